//! System prompt assembly.
//!
//! The per-agent voice prompt is combined with a fixed tool-usage protocol.
//! Voice models that call tools silently leave the user listening to dead
//! air, so the protocol text is not optional.

/// Appended to every composed prompt.
const TOOL_USAGE_PROTOCOL: &str = "\
===CRITICAL TOOL USAGE PROTOCOL===
When you need to use the ask_agent tool, you MUST follow this exact sequence:

STEP 1: SPEAK FIRST - Always verbally acknowledge what you're about to do
  Examples: \"Let me check that for you\", \"One moment while I look that up\", \"I'll find that information\"

STEP 2: USE TOOL - Then call the ask_agent tool with your query

STEP 3: RESPOND - Present the tool's results naturally to the user

NEVER skip Step 1. Calling a tool without speaking first creates awkward silence and confuses users.

===CORRECT EXAMPLE===
User: \"What's my account balance?\"
Assistant: \"Let me check your account balance for you.\" [speaks this out loud]
Assistant: [calls ask_agent tool with query: \"retrieve account balance\"]
Assistant: [receives result: \"$1,234.56\"]
Assistant: \"Your current account balance is $1,234.56\"

===INCORRECT EXAMPLE (DO NOT DO THIS)===
User: \"What's my account balance?\"
Assistant: [immediately calls ask_agent tool] <- WRONG! User hears silence
Assistant: \"Your balance is $1,234.56\"

Remember: Humans need to hear you're working on their request. Always speak before using tools.";

/// Used when the agent configuration carries no voice prompt at all.
const FALLBACK_PROMPT: &str = "You are a helpful voice assistant. CRITICAL: Always \
verbally acknowledge before using any tools by saying something like 'Let me check \
that for you' to avoid awkward silence. Never call tools silently.";

/// Compose the system prompt for one session from the agent's
/// configuration.
pub fn compose_system_prompt(
    agent_name: &str,
    voice_prompt: Option<&str>,
    personality: Option<&str>,
) -> String {
    let Some(voice_prompt) = voice_prompt.filter(|p| !p.trim().is_empty()) else {
        return FALLBACK_PROMPT.to_string();
    };

    let mut prompt = format!("Your name is {agent_name}. {voice_prompt}");
    if let Some(personality) = personality.filter(|p| !p.trim().is_empty()) {
        prompt.push_str("\n\nPERSONALITY: ");
        prompt.push_str(personality);
    }
    prompt.push_str("\n\n");
    prompt.push_str(TOOL_USAGE_PROTOCOL);
    prompt
}

//! Full-session tests over an in-memory mock transport.
//!
//! These drive real sessions end to end: handshake ordering, audio relay,
//! tool invocation, barge-in, and teardown, with the mock upstream playing
//! the speech service.

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use bytes::Bytes;
use serde_json::json;

use oratio_gateway::core::session::{CloseReason, SessionNotice, SessionState};
use oratio_gateway::core::transcript::TurnRole;

use support::{
    DelayMapBackend, StaticBackend, next_notice, start_test_session, wait_until,
};

fn static_backend(answer: &str) -> Arc<StaticBackend> {
    Arc::new(StaticBackend {
        answer: answer.to_string(),
        delay: Duration::ZERO,
    })
}

/// Every `contentStart` the session sent must have exactly one matching
/// `contentEnd`, teardown included.
fn assert_content_blocks_balanced(sent: &[serde_json::Value]) {
    let mut open_counts: HashMap<String, i64> = HashMap::new();
    for frame in sent {
        if let Some(start) = frame["event"].get("contentStart") {
            *open_counts
                .entry(start["contentName"].as_str().unwrap().to_string())
                .or_default() += 1;
        }
        if let Some(end) = frame["event"].get("contentEnd") {
            *open_counts
                .entry(end["contentName"].as_str().unwrap().to_string())
                .or_default() -= 1;
        }
    }
    for (name, count) in open_counts {
        assert_eq!(count, 0, "content block '{name}' is unbalanced");
    }
}

#[tokio::test]
async fn test_handshake_precedes_everything() {
    let mut session = start_test_session(static_backend("ok"), 256).await;

    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));
    session.upstream.wait_for_kind("contentStart", 2).await;

    let kinds = session.upstream.sent_kinds();
    assert_eq!(
        &kinds[..6],
        &[
            "sessionStart",
            "promptStart",
            "contentStart",
            "textInput",
            "contentEnd",
            "contentStart",
        ],
        "handshake order violated: {kinds:?}"
    );

    let sent = session.upstream.sent();
    // System prompt content block.
    assert_eq!(sent[2]["event"]["contentStart"]["type"], "TEXT");
    assert_eq!(sent[2]["event"]["contentStart"]["role"], "SYSTEM");
    assert_eq!(
        sent[3]["event"]["textInput"]["content"],
        "You are a test assistant."
    );
    // The tool schema rides on promptStart.
    assert_eq!(
        sent[1]["event"]["promptStart"]["toolConfiguration"]["tools"][0]["toolSpec"]["name"],
        "ask_agent"
    );
    // The inbound audio content opens before the session goes active.
    assert_eq!(sent[5]["event"]["contentStart"]["type"], "AUDIO");
    assert_eq!(sent[5]["event"]["contentStart"]["role"], "USER");

    assert_eq!(session.handle.state(), SessionState::AudioActive);
}

#[tokio::test]
async fn test_example_scenario() {
    let mut session = start_test_session(static_backend("Your balance is $42"), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));
    session.upstream.wait_for_kind("contentStart", 2).await;

    let audio_name = session
        .upstream
        .payloads_of("contentStart")
        .into_iter()
        .find(|p| p["type"] == "AUDIO")
        .expect("no audio content block")["contentName"]
        .as_str()
        .unwrap()
        .to_string();

    // Client streams three audio chunks.
    for chunk in [&b"chunk-1"[..], b"chunk-2", b"chunk-3"] {
        assert!(session.handle.push_audio(Bytes::copy_from_slice(chunk)).await);
    }
    session.upstream.wait_for_kind("audioInput", 3).await;
    let audio_events = session.upstream.payloads_of("audioInput");
    for (event, chunk) in audio_events.iter().zip([&b"chunk-1"[..], b"chunk-2", b"chunk-3"]) {
        assert_eq!(event["contentName"], audio_name.as_str());
        assert_eq!(event["content"], BASE64_STANDARD.encode(chunk));
    }

    // The user's speech is transcribed.
    session
        .upstream
        .emit(json!({"textOutput": {"content": "What's my balance?", "role": "USER"}}))
        .await;
    match next_notice(&mut session.notices).await {
        SessionNotice::Transcript { role, content } => {
            assert_eq!(role, TurnRole::User);
            assert_eq!(content, "What's my balance?");
        }
        other => panic!("expected transcript, got {other:?}"),
    }

    // The model requests a tool invocation.
    session
        .upstream
        .emit(json!({"toolUse": {
            "toolUseId": "t1",
            "toolName": "ask_agent",
            "content": "{\"query\":\"status\"}"
        }}))
        .await;
    match next_notice(&mut session.notices).await {
        SessionNotice::ToolCall { tool, input } => {
            assert_eq!(tool, "ask_agent");
            assert_eq!(input["query"], "status");
        }
        other => panic!("expected tool call, got {other:?}"),
    }
    match next_notice(&mut session.notices).await {
        SessionNotice::ToolResult { tool, result } => {
            assert_eq!(tool, "ask_agent");
            assert_eq!(result, "Your balance is $42");
        }
        other => panic!("expected tool result, got {other:?}"),
    }

    // The result went upstream as one bracketed TOOL block.
    session.upstream.wait_for_kind("toolResult", 1).await;
    let sent = session.upstream.sent();
    let start_index = sent
        .iter()
        .position(|f| {
            f["event"]["contentStart"]["toolResultInputConfiguration"]["toolUseId"] == "t1"
        })
        .expect("no tool result block");
    let block_name = sent[start_index]["event"]["contentStart"]["contentName"]
        .as_str()
        .unwrap();
    assert_eq!(
        sent[start_index + 1]["event"]["toolResult"]["contentName"],
        block_name
    );
    assert_eq!(
        sent[start_index + 1]["event"]["toolResult"]["content"],
        r#"{"answer":"Your balance is $42"}"#
    );
    assert_eq!(
        sent[start_index + 2]["event"]["contentEnd"]["contentName"],
        block_name
    );

    // The model speaks the answer.
    session
        .upstream
        .emit(json!({"textOutput": {"content": "Your balance is $42", "role": "ASSISTANT"}}))
        .await;
    match next_notice(&mut session.notices).await {
        SessionNotice::Transcript { role, .. } => assert_eq!(role, TurnRole::Assistant),
        other => panic!("expected transcript, got {other:?}"),
    }
    for pcm in [&[10u8, 11][..], &[12, 13]] {
        session
            .upstream
            .emit(json!({"audioOutput": {"content": BASE64_STANDARD.encode(pcm)}}))
            .await;
    }
    for expected in [&[10u8, 11][..], &[12, 13]] {
        match next_notice(&mut session.notices).await {
            SessionNotice::Audio(frame) => assert_eq!(frame.pcm.as_ref(), expected),
            other => panic!("expected audio, got {other:?}"),
        }
    }

    // Client ends the session.
    session.handle.shutdown(CloseReason::ClientEnd).await;
    assert_eq!(session.handle.state(), SessionState::Closed);
    assert_eq!(session.upstream.count_kind("promptEnd"), 1);
    assert_eq!(session.upstream.count_kind("sessionEnd"), 1);
    assert!(session.upstream.sink_closed());
    assert_content_blocks_balanced(&session.upstream.sent());

    // The transcript was flushed once, turns in real order.
    let flushed = session.store.flushed.lock();
    assert_eq!(flushed.len(), 1);
    let roles: Vec<TurnRole> = flushed[0].turns.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![TurnRole::User, TurnRole::Tool, TurnRole::Assistant]
    );
    assert_eq!(flushed[0].turns[1].tool_name.as_deref(), Some("ask_agent"));
}

#[tokio::test]
async fn test_barge_in_drains_without_closing() {
    // Notice capacity 1 so outbound frames genuinely queue in the session.
    let mut session = start_test_session(static_backend("ok"), 1).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));
    session.upstream.wait_for_kind("contentStart", 2).await;

    for byte in [1u8, 2, 3, 4] {
        session
            .upstream
            .emit(json!({"audioOutput": {"content": BASE64_STANDARD.encode([byte; 4])}}))
            .await;
    }
    session
        .upstream
        .emit(json!({"textOutput": {
            "content": "{ \"interrupted\" : true }",
            "role": "ASSISTANT"
        }}))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Frames delivered before the interrupt notification can only be the
    // ones already in flight; everything still queued is discarded.
    let mut delivered_before = Vec::new();
    loop {
        match next_notice(&mut session.notices).await {
            SessionNotice::Audio(frame) => delivered_before.push(frame.pcm[0]),
            SessionNotice::BargeIn => break,
            other => panic!("unexpected notice before barge-in: {other:?}"),
        }
    }
    assert!(
        delivered_before.iter().all(|b| *b <= 2),
        "frames queued behind the in-flight one must be discarded, got {delivered_before:?}"
    );

    // The session is still live: new output flows, the audio content block
    // and the upstream connection were never touched.
    session
        .upstream
        .emit(json!({"audioOutput": {"content": BASE64_STANDARD.encode([9u8; 4])}}))
        .await;
    match next_notice(&mut session.notices).await {
        SessionNotice::Audio(frame) => assert_eq!(frame.pcm[0], 9),
        other => panic!("expected audio after barge-in, got {other:?}"),
    }
    assert_eq!(session.handle.state(), SessionState::AudioActive);
    assert_eq!(session.upstream.count_kind("contentEnd"), 1); // system prompt only
    assert!(!session.upstream.sink_closed());
}

#[tokio::test]
async fn test_concurrent_tool_calls_stay_correlated() {
    let mut answers = HashMap::new();
    answers.insert(
        "slow".to_string(),
        ("slow-answer".to_string(), Duration::from_millis(200)),
    );
    answers.insert(
        "fast".to_string(),
        ("fast-answer".to_string(), Duration::from_millis(10)),
    );
    let mut session = start_test_session(Arc::new(DelayMapBackend { answers }), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    session
        .upstream
        .emit(json!({"toolUse": {
            "toolUseId": "t-slow",
            "toolName": "ask_agent",
            "content": "{\"query\":\"slow\"}"
        }}))
        .await;
    session
        .upstream
        .emit(json!({"toolUse": {
            "toolUseId": "t-fast",
            "toolName": "ask_agent",
            "content": "{\"query\":\"fast\"}"
        }}))
        .await;

    session.upstream.wait_for_kind("toolResult", 2).await;
    let sent = session.upstream.sent();

    // Map each tool block to its correlation id and check the block is one
    // indivisible contentStart/toolResult/contentEnd run.
    let mut results_by_id = HashMap::new();
    for (index, frame) in sent.iter().enumerate() {
        let Some(start) = frame["event"].get("contentStart") else {
            continue;
        };
        let Some(correlation) = start
            .get("toolResultInputConfiguration")
            .and_then(|c| c["toolUseId"].as_str())
        else {
            continue;
        };
        let name = start["contentName"].as_str().unwrap();
        assert_eq!(
            sent[index + 1]["event"]["toolResult"]["contentName"],
            name,
            "tool block interleaved with other traffic"
        );
        assert_eq!(sent[index + 2]["event"]["contentEnd"]["contentName"], name);
        results_by_id.insert(
            correlation.to_string(),
            sent[index + 1]["event"]["toolResult"]["content"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    assert_eq!(results_by_id.len(), 2);
    assert_eq!(results_by_id["t-fast"], r#"{"answer":"fast-answer"}"#);
    assert_eq!(results_by_id["t-slow"], r#"{"answer":"slow-answer"}"#);

    // The fast invocation finished first even though it was requested
    // second; neither corrupted the other.
    let tool_results = session.upstream.payloads_of("toolResult");
    assert_eq!(
        tool_results[0]["content"].as_str().unwrap(),
        r#"{"answer":"fast-answer"}"#
    );
}

#[tokio::test]
async fn test_tool_failure_is_reported_into_conversation() {
    // The backend knows no queries, so every invocation fails.
    let mut session =
        start_test_session(Arc::new(DelayMapBackend { answers: HashMap::new() }), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    session
        .upstream
        .emit(json!({"toolUse": {
            "toolUseId": "t1",
            "toolName": "ask_agent",
            "content": "{\"query\":\"anything\"}"
        }}))
        .await;

    session.upstream.wait_for_kind("toolResult", 1).await;
    let payload = &session.upstream.payloads_of("toolResult")[0];
    let content: serde_json::Value =
        serde_json::from_str(payload["content"].as_str().unwrap()).unwrap();
    assert!(content["error"].as_str().unwrap().contains("no answer"));

    // The session survived the failure.
    assert_eq!(session.handle.state(), SessionState::AudioActive);
}

#[tokio::test]
async fn test_teardown_runs_exactly_once() {
    let mut session = start_test_session(static_backend("ok"), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    // Upstream dies and the client disconnects at the same time.
    session.upstream.disconnect();
    session
        .handle
        .shutdown(CloseReason::ClientDisconnected)
        .await;
    // A second close request is a no-op.
    session.handle.shutdown(CloseReason::ClientEnd).await;

    assert_eq!(session.handle.state(), SessionState::Closed);
    assert_eq!(session.upstream.count_kind("promptEnd"), 1);
    assert_eq!(session.upstream.count_kind("sessionEnd"), 1);
    assert_eq!(session.store.flushed.lock().len(), 1);
    assert_content_blocks_balanced(&session.upstream.sent());
}

#[tokio::test]
async fn test_upstream_error_surfaces_and_closes() {
    let mut session = start_test_session(static_backend("ok"), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    session.upstream.emit_error("boom").await;

    let mut saw_fault = false;
    loop {
        match next_notice(&mut session.notices).await {
            SessionNotice::Fault { message } => {
                assert!(message.contains("boom"));
                saw_fault = true;
            }
            SessionNotice::Closed => break,
            _ => {}
        }
    }
    assert!(saw_fault, "fatal upstream error was not surfaced");

    wait_until(
        || session.handle.state() == SessionState::Closed,
        "session closed",
    )
    .await;
    assert_eq!(session.store.flushed.lock().len(), 1);
    assert_content_blocks_balanced(&session.upstream.sent());
}

#[tokio::test]
async fn test_late_tool_result_is_discarded_after_close() {
    let backend = Arc::new(StaticBackend {
        answer: "too late".to_string(),
        delay: Duration::from_millis(300),
    });
    let mut session = start_test_session(backend, 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    session
        .upstream
        .emit(json!({"toolUse": {
            "toolUseId": "t1",
            "toolName": "ask_agent",
            "content": "{\"query\":\"anything\"}"
        }}))
        .await;
    // Close while the invocation is still in flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.handle.shutdown(CloseReason::ClientEnd).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.upstream.count_kind("toolResult"), 0);
    let flushed = session.store.flushed.lock();
    assert!(flushed[0].turns.iter().all(|t| t.role != TurnRole::Tool));
}

#[tokio::test]
async fn test_stop_and_start_audio_commands() {
    let mut session = start_test_session(static_backend("ok"), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));
    session.upstream.wait_for_kind("contentStart", 2).await;
    let first_audio_name = session
        .upstream
        .payloads_of("contentStart")
        .into_iter()
        .find(|p| p["type"] == "AUDIO")
        .unwrap()["contentName"]
        .as_str()
        .unwrap()
        .to_string();

    // Closing the audio content leaves the session active but audio
    // frames have nowhere to go.
    session.handle.stop_audio().await.unwrap();
    session.upstream.wait_for_kind("contentEnd", 2).await;
    assert!(session.handle.push_audio(Bytes::from_static(b"dropped")).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.upstream.count_kind("audioInput"), 0);
    assert_eq!(session.handle.state(), SessionState::AudioActive);

    // Reopening mints a fresh content block.
    session.handle.start_audio().await.unwrap();
    session.upstream.wait_for_kind("contentStart", 3).await;
    assert!(session.handle.push_audio(Bytes::from_static(b"heard")).await);
    session.upstream.wait_for_kind("audioInput", 1).await;

    let audio_event = &session.upstream.payloads_of("audioInput")[0];
    let second_name = audio_event["contentName"].as_str().unwrap();
    assert_ne!(second_name, first_audio_name);

    session.handle.shutdown(CloseReason::ClientEnd).await;
    assert_content_blocks_balanced(&session.upstream.sent());
}

#[tokio::test]
async fn test_malformed_frames_are_dropped_not_fatal() {
    let mut session = start_test_session(static_backend("ok"), 256).await;
    assert!(matches!(
        next_notice(&mut session.notices).await,
        SessionNotice::Ready
    ));

    session.upstream.emit_raw("this is not json").await;
    session.upstream.emit(json!({"mysteryEvent": {"x": 1}})).await;
    session
        .upstream
        .emit(json!({"textOutput": {"content": "still here", "role": "ASSISTANT"}}))
        .await;

    match next_notice(&mut session.notices).await {
        SessionNotice::Transcript { content, .. } => assert_eq!(content, "still here"),
        other => panic!("expected transcript, got {other:?}"),
    }
    assert_eq!(session.handle.state(), SessionState::AudioActive);
}

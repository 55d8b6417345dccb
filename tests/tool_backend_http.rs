//! HTTP agent backend tests against a mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oratio_gateway::core::tools::{AgentBackend, HttpAgentBackend, ToolBridge, ToolError};

fn backend_for(server: &MockServer) -> HttpAgentBackend {
    let endpoint = Url::parse(&format!("{}/invocations", server.uri())).unwrap();
    HttpAgentBackend::new(endpoint)
}

#[tokio::test]
async fn test_successful_invocation_extracts_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invocations"))
        .and(body_partial_json(json!({
            "agent_id": "agent-1",
            "actor_id": "actor-1",
            "session_id": "sess-1",
            "prompt": "what is my balance"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"message": {"content": [{"text": "Your balance is $42"}]}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let answer = backend
        .invoke("agent-1", "actor-1", "sess-1", "what is my balance")
        .await
        .unwrap();
    assert_eq!(answer, "Your balance is $42");
}

#[tokio::test]
async fn test_error_body_becomes_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invocations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "agent exploded"
        })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    match backend.invoke("a", "b", "c", "query").await {
        Err(ToolError::Backend(message)) => assert!(message.contains("agent exploded")),
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invocations"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "oops"})))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    match backend.invoke("a", "b", "c", "query").await {
        Err(ToolError::Backend(message)) => assert!(message.contains("500")),
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_plain_string_output_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invocations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"output": "plain answer"})),
        )
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let answer = backend.invoke("a", "b", "c", "query").await.unwrap();
    assert_eq!(answer, "plain answer");
}

#[tokio::test]
async fn test_bridge_enforces_timeout_over_slow_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invocations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"output": "late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let bridge = ToolBridge::new(
        Arc::new(backend_for(&server)),
        "agent-1",
        "actor-1",
        "sess-1",
        Duration::from_millis(100),
    );
    let input = json!({"query": "anything"});
    match bridge.invoke("ask_agent", &input).await {
        Err(ToolError::Timeout(_)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
}

//! Routing against mock OpenAI-compatible providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orion_llm::{
    AttemptError, BackendCall, LlmBackend, LlmError, LlmRequest, LlmRouter, OpenAiCompatibleBackend,
    RouterError, RoutingPolicy,
};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_response(model: &str, content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 }
    })
}

fn remote_policy(fallback: &[&str], keys: &[(&str, &str)]) -> RoutingPolicy {
    RoutingPolicy {
        prefer_local: false,
        local_model: "mistral".to_string(),
        local_aliases: Vec::new(),
        fallback_order: fallback.iter().map(|s| s.to_string()).collect(),
        credentials: keys
            .iter()
            .map(|(p, k)| (p.to_string(), SecretString::from(k.to_string())))
            .collect::<HashMap<_, _>>(),
        timeout: Duration::from_secs(5),
        max_retries: 0,
    }
}

fn backend_for(server: &MockServer, provider: &str) -> Arc<dyn LlmBackend> {
    Arc::new(OpenAiCompatibleBackend::new(provider, format!("{}/v1", server.uri())))
}

#[tokio::test]
async fn test_remote_request_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "Be brief" },
                { "role": "user", "content": "Merhaba" }
            ],
            "max_tokens": 50
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("gpt-4o-mini", "Selam")))
        .expect(1)
        .mount(&server)
        .await;

    let mut router = LlmRouter::new(Arc::new(remote_policy(&["openai/gpt-4o-mini"], &[("openai", "sk-test")])));
    router.register_backend(backend_for(&server, "openai"));

    let request = LlmRequest::new("Merhaba").with_system_prompt("Be brief").with_max_tokens(50);
    let (resp, audit) = router.route_audited(&request).await.unwrap();

    assert_eq!(resp.content, "Selam");
    assert_eq!(resp.model_used, "openai/gpt-4o-mini");
    assert_eq!(resp.tokens_used, Some(12));
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    assert_eq!(resp.metadata["served_model"], "gpt-4o-mini");
    assert_eq!(audit.provider.as_deref(), Some("openai"));
    assert_eq!(audit.attempts, 1);
}

#[tokio::test]
async fn test_server_error_falls_back_to_next_provider() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "type": "server_error", "message": "Internal server error" }
        })))
        .expect(1)
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("command-r", "ok")))
        .expect(1)
        .mount(&healthy)
        .await;

    let policy = remote_policy(&["p1/a", "p2/command-r"], &[("p1", "k1"), ("p2", "k2")]);
    let mut router = LlmRouter::new(Arc::new(policy));
    router.register_backend(backend_for(&failing, "p1"));
    router.register_backend(backend_for(&healthy, "p2"));

    let resp = router.route(&LlmRequest::new("hi")).await.unwrap();
    assert_eq!(resp.model_used, "p2/command-r");
    assert_eq!(resp.content, "ok");
}

#[tokio::test]
async fn test_api_error_message_is_preserved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "type": "invalid_api_key", "message": "Incorrect API key provided" }
        })))
        .mount(&server)
        .await;

    let mut router = LlmRouter::new(Arc::new(remote_policy(&["openai/gpt-4o"], &[("openai", "bad")])));
    router.register_backend(backend_for(&server, "openai"));

    match router.route(&LlmRequest::new("hi")).await.unwrap_err() {
        RouterError::AllModelsFailed { failures, skipped } => {
            assert!(skipped.is_empty());
            assert_eq!(failures.len(), 1);
            match &failures[0] {
                AttemptError::BackendCallFailed { backend, source: LlmError::ApiError { status, message } } => {
                    assert_eq!(backend, "openai/gpt-4o");
                    assert_eq!(*status, 401);
                    assert_eq!(message, "Incorrect API key provided");
                }
                other => panic!("unexpected failure: {other}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("openai", format!("{}/v1", server.uri()));
    let request = LlmRequest::new("hi");
    let call = BackendCall { request: &request, model: "gpt-4o", model_id: "openai/gpt-4o", credential: None };
    let err = backend.complete(call).await.unwrap_err();
    assert!(matches!(err, LlmError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_response("a", "late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;

    let mut policy = remote_policy(&["p1/a"], &[("p1", "k1")]);
    policy.timeout = Duration::from_millis(100);
    let mut router = LlmRouter::new(Arc::new(policy));
    router.register_backend(backend_for(&slow, "p1"));

    match router.route(&LlmRequest::new("hi")).await.unwrap_err() {
        RouterError::AllModelsFailed { failures, .. } => assert!(matches!(
            &failures[0],
            AttemptError::BackendCallFailed { source: LlmError::Timeout(_), .. }
        )),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_openrouter_identifies_itself() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .and(header("x-title", "Orion Vision Core"))
        .and(header("http-referer", "https://orion-vision-core.local"))
        .and(body_partial_json(json!({ "model": "anthropic/claude-3-haiku" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("anthropic/claude-3-haiku", "hi")))
        .expect(1)
        .mount(&server)
        .await;

    let policy = remote_policy(&["openrouter/anthropic/claude-3-haiku"], &[("openrouter", "sk-or")]);
    let mut router = LlmRouter::new(Arc::new(policy));
    router.register_backend(Arc::new(
        OpenAiCompatibleBackend::openrouter().with_base_url(format!("{}/api/v1", server.uri())),
    ));

    let resp = router.route(&LlmRequest::new("hi")).await.unwrap();
    assert_eq!(resp.model_used, "openrouter/anthropic/claude-3-haiku");
}

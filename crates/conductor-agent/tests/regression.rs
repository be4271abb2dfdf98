//! Regression tests for conductor-agent: config loading, caller wiring and the
//! OpenAI-compatible backend against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_agent::backends::openai::classify_status;
use conductor_agent::{
    BackendRegistry, BreakerState, CallRequest, CallTarget, Complexity, ConductorConfig,
    LlmBackend, OpenAiCompatBackend, ResilientCaller, SelectionContext, Tier,
};
use conductor_core::{ConductorError, FailureKind};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"
[breaker]
failure_threshold = 1
cooldown_ms = 60000

[budget]
ceiling_usd = 1.0
window = "unbounded"

[selector.typical_cost]
premium = 0.09
standard = 0.018
economy = 0.0015

[[targets]]
id = "primary"
provider = "primary"
model = "big-model"
tier = "standard"
price_per_input_unit = 0.003
price_per_output_unit = 0.015

[[targets]]
id = "secondary"
provider = "secondary"
model = "other-model"
tier = "standard"
price_per_input_unit = 0.0025
price_per_output_unit = 0.01
"#;

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30}
    })
}

fn target(provider: &str) -> CallTarget {
    CallTarget::new("t", provider, "gpt-4o-mini", Tier::Economy)
}

// --- Config ---

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = ConductorConfig::load(file.path()).unwrap();
    assert_eq!(config.targets.len(), 2);
    assert_eq!(config.breaker.failure_threshold, 1);
    assert_eq!(config.budget.ceiling_usd, Some(1.0));
    assert_eq!(config.typical_cost_override(Tier::Premium), Some(0.09));
    assert_eq!(config.chain_for(Tier::Standard).len(), 2);
}

#[test]
fn test_load_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConductorConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConductorError::Config(_)));
}

#[test]
fn test_malformed_toml_is_toml_error() {
    let err = ConductorConfig::from_toml_str("[breaker\nfailure_threshold = ").unwrap_err();
    assert!(matches!(err, ConductorError::Toml(_)));
}

// --- OpenAI-compatible backend ---

#[tokio::test]
async fn test_backend_parses_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini", "max_tokens": 64})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("pong")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiCompatBackend::new(server.uri(), "sk-test");
    let out = backend
        .invoke(&target("openai"), "ping", 64, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out.output, "pong");
    assert_eq!(out.input_units, 20);
    assert_eq!(out.output_units, 10);
}

#[tokio::test]
async fn test_backend_classifies_error_statuses() {
    for (status, kind) in [
        (429, FailureKind::RateLimit),
        (503, FailureKind::Overload),
        (401, FailureKind::Auth),
        (422, FailureKind::MalformedRequest),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("{\"error\":\"nope\"}"))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::new(server.uri(), "sk-test");
        let err = backend
            .invoke(&target("openai"), "ping", 64, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, kind, "status {status}");
        assert_eq!(classify_status(status, ""), kind);
    }
}

#[tokio::test]
async fn test_unreadable_success_body_is_transient() {
    for body in ["<html>upstream hiccup</html>", r#"{"choices":[]}"#] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let backend = OpenAiCompatBackend::new(server.uri(), "sk-test");
        let err = backend
            .invoke(&target("openai"), "ping", 64, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Overload, "body {body}");
        assert!(err.kind.is_transient());
    }
}

#[tokio::test]
async fn test_backend_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let backend = OpenAiCompatBackend::new(server.uri(), "sk-test");
    let err = backend
        .invoke(&target("openai"), "ping", 64, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
    assert!(err.kind.is_transient());
}

#[tokio::test]
async fn test_backend_unreachable_is_network() {
    let backend = OpenAiCompatBackend::new("http://127.0.0.1:1", "sk-test");
    let err = backend
        .invoke(&target("openai"), "ping", 64, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Network);
}

// --- Caller wired from config ---

#[tokio::test]
async fn test_caller_from_config_falls_back_over_http() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .expect(1)
        .mount(&primary)
        .await;

    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("served")))
        .expect(2)
        .mount(&secondary)
        .await;

    let config = ConductorConfig::from_toml_str(CONFIG).unwrap();
    let backends = BackendRegistry::new()
        .with("primary", Arc::new(OpenAiCompatBackend::new(primary.uri(), "k1")))
        .with("secondary", Arc::new(OpenAiCompatBackend::new(secondary.uri(), "k2")));
    let caller = ResilientCaller::from_config(&config, backends);

    let ctx = SelectionContext::new("summarization", Complexity::Complex);
    let request = CallRequest::new("summarize this").with_max_output_units(100);

    let first = caller.call(&ctx, &request).await.unwrap();
    assert_eq!(first.target_used, "secondary");
    assert!(first.did_fallback);
    assert_eq!(
        caller.breakers().get("primary").state(),
        BreakerState::Open
    );

    // Primary is open now; the second call skips it without an HTTP request.
    let second = caller.call(&ctx, &request).await.unwrap();
    assert_eq!(second.target_used, "secondary");
    assert_eq!(caller.tracker().calls(), 2);
    assert!(caller.tracker().spent() > 0.0);
}

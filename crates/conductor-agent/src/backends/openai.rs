use super::{Invocation, LlmBackend};
use crate::target::CallTarget;
use async_trait::async_trait;
use conductor_core::{FailureKind, ProviderError};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiCompatBackend {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Backend for `base_url` (without the `/v1` suffix) with a bearer key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    async fn invoke(
        &self,
        target: &CallTarget,
        prompt: &str,
        max_output_units: u32,
        timeout: Duration,
    ) -> Result<Invocation, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": target.model,
            "max_tokens": max_output_units,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        let text = resp.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            let kind = classify_status(status.as_u16(), &text);
            debug!(target_id = %target.id, status = status.as_u16(), %kind, "Provider returned error");
            return Err(ProviderError::new(
                kind,
                format!("{} API error {status}: {text}", target.provider),
            ));
        }

        // A 2xx body we cannot read is the provider's fault, not the request's.
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            ProviderError::new(
                FailureKind::Overload,
                format!("unparseable response from {}: {e}", target.provider),
            )
        })?;
        parse_completion(&json, prompt)
    }
}

/// Map an HTTP error status to a failure kind.
///
/// `body` is inspected for content-filter markers, which some providers
/// report as a plain 400.
pub fn classify_status(status: u16, body: &str) -> FailureKind {
    match status {
        429 => FailureKind::RateLimit,
        408 | 504 => FailureKind::Timeout,
        401 | 403 => FailureKind::Auth,
        500 | 502 | 503 | 529 => FailureKind::Overload,
        s if s >= 500 => FailureKind::Overload,
        _ if body.contains("content_filter") || body.contains("content_policy") => {
            FailureKind::ContentPolicy
        }
        _ => FailureKind::MalformedRequest,
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::new(FailureKind::Timeout, err.to_string())
    } else if err.is_builder() {
        ProviderError::new(FailureKind::MalformedRequest, err.to_string())
    } else if err.is_decode() {
        ProviderError::new(FailureKind::Overload, err.to_string())
    } else {
        ProviderError::new(FailureKind::Network, err.to_string())
    }
}

/// Extract the completion text and billed units from a chat completions body.
///
/// Missing usage figures fall back to a four-characters-per-unit estimate.
pub fn parse_completion(body: &serde_json::Value, prompt: &str) -> Result<Invocation, ProviderError> {
    let choice = &body["choices"][0];
    if choice.is_null() {
        return Err(ProviderError::new(
            FailureKind::Overload,
            "response has no choices",
        ));
    }
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(ProviderError::new(
            FailureKind::ContentPolicy,
            "completion was blocked by the content filter",
        ));
    }

    let output = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let usage = &body["usage"];
    let input_units = usage["prompt_tokens"]
        .as_u64()
        .map(|n| n.min(u64::from(u32::MAX)) as u32)
        .unwrap_or_else(|| estimate_units(prompt));
    let output_units = usage["completion_tokens"]
        .as_u64()
        .map(|n| n.min(u64::from(u32::MAX)) as u32)
        .unwrap_or_else(|| estimate_units(&output));

    Ok(Invocation {
        output,
        input_units,
        output_units,
    })
}

/// Rough unit count of a text: one unit per four characters, rounded up.
pub fn estimate_units(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

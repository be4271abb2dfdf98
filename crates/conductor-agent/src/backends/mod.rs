/// OpenAI-compatible chat completions over HTTP.
pub mod openai;

use crate::target::CallTarget;
use async_trait::async_trait;
use conductor_core::ProviderError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What a provider returned for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Completion text.
    pub output: String,
    /// Billed input units as reported by the provider.
    pub input_units: u32,
    /// Billed output units as reported by the provider.
    pub output_units: u32,
}

impl Invocation {
    /// Invocation with explicit unit counts.
    pub fn new(output: impl Into<String>, input_units: u32, output_units: u32) -> Self {
        Self {
            output: output.into(),
            input_units,
            output_units,
        }
    }
}

/// Trait for LLM provider backends.
///
/// One backend serves every target of its provider; the target carries the
/// model to ask for. Failures must be classified into a
/// [`conductor_core::FailureKind`] so the caller can decide between falling
/// back and aborting.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send `prompt` to `target` and wait at most `timeout` for the completion.
    async fn invoke(
        &self,
        target: &CallTarget,
        prompt: &str,
        max_output_units: u32,
        timeout: Duration,
    ) -> Result<Invocation, ProviderError>;
}

/// Backends keyed by provider name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every target of `provider` with `backend`, replacing any earlier one.
    pub fn register(&mut self, provider: impl Into<String>, backend: Arc<dyn LlmBackend>) {
        self.backends.insert(provider.into(), backend);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, provider: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Self {
        self.register(provider, backend);
        self
    }

    /// Backend for a provider.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends.get(provider).cloned()
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// No provider registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

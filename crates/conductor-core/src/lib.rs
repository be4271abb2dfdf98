//! Core types and error definitions for the Conductor workspace.
//!
//! This crate provides the foundational types shared by the resilient call
//! layer (`conductor-agent`) and the scheduler (`conductor-orchestrator`):
//! the provider failure taxonomy, the crate-wide error enum and the
//! lifecycle events emitted while a task graph runs.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`FailureKind`] / [`FailureClass`]: Classification of a failed provider call.
//! - [`ProviderError`]: A classified error returned by an LLM provider backend.
//! - [`AttemptRecord`]: One entry of the attempt history of a resilient call.
//! - [`LifecycleEvent`] / [`EventSink`]: Observability boundary.

/// Lifecycle events and event sinks.
pub mod event;

pub use event::{EventSink, FanoutSink, LifecycleEvent, NullSink, TracingSink};

use serde::{Deserialize, Serialize};
use std::fmt;

// --- Provider failure taxonomy ---

/// Whether a failed call is worth retrying against another target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Rate limits, overload, timeouts and network blips. Another target may succeed.
    Transient,
    /// Auth failures, malformed requests and policy rejections.
    Fatal,
}

/// The concrete reason a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider throttled the request (HTTP 429).
    RateLimit,
    /// The provider is overloaded, returned a 5xx, or answered 2xx with a
    /// body that carries no completion.
    Overload,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Connection refused, reset, DNS failure and similar.
    Network,
    /// Missing or rejected credentials.
    Auth,
    /// The provider rejected the request shape (HTTP 400/404/422).
    MalformedRequest,
    /// The provider refused the content.
    ContentPolicy,
}

impl FailureKind {
    /// Returns the failure class for this kind.
    pub fn class(self) -> FailureClass {
        match self {
            FailureKind::RateLimit
            | FailureKind::Overload
            | FailureKind::Timeout
            | FailureKind::Network => FailureClass::Transient,
            FailureKind::Auth | FailureKind::MalformedRequest | FailureKind::ContentPolicy => {
                FailureClass::Fatal
            }
        }
    }

    /// Returns `true` if this failure should move the call to the next target.
    pub fn is_transient(self) -> bool {
        self.class() == FailureClass::Transient
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimit => write!(f, "rate_limit"),
            FailureKind::Overload => write!(f, "overload"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::MalformedRequest => write!(f, "malformed_request"),
            FailureKind::ContentPolicy => write!(f, "content_policy"),
        }
    }
}

/// A classified error returned by an LLM provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    /// What went wrong.
    pub kind: FailureKind,
    /// Provider-supplied detail, for logs only.
    pub message: String,
}

impl ProviderError {
    /// Creates a new provider error.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`FailureKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Returns the failure class of this error.
    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

// --- Attempt history ---

/// Why a single candidate of a resilient call did not produce a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The target was invoked and failed.
    Failed {
        /// The classified provider error.
        error: ProviderError,
    },
    /// The target's circuit breaker rejected the call without contacting it.
    CircuitOpen,
    /// The estimated cost did not fit the remaining budget.
    OverBudget {
        /// Estimated cost of the attempt in USD.
        estimated: f64,
        /// Budget remaining when the attempt was considered.
        remaining: f64,
    },
}

/// One entry in the attempt history of a resilient call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Identifier of the call target.
    pub target: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Failed { error } => write!(f, "{}: {error}", self.target),
            AttemptOutcome::CircuitOpen => write!(f, "{}: circuit open", self.target),
            AttemptOutcome::OverBudget {
                estimated,
                remaining,
            } => write!(
                f,
                "{}: estimated ${estimated:.4} exceeds remaining ${remaining:.4}",
                self.target
            ),
        }
    }
}

fn format_attempts(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// --- Error types ---

/// Top-level error type for the Conductor workspace.
///
/// Each variant corresponds to one failure mode of the call layer or the
/// scheduler. Task-local failures are recorded on the task; only the graph
/// level variants ever surface as a run failure.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// A provider call failed and the failure ended the call chain.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No candidate target fits the remaining budget.
    #[error("Budget exceeded: cheapest candidate needs ${required:.4}, ${remaining:.4} remaining")]
    BudgetExceeded {
        /// Cheapest estimated cost among the candidates considered.
        required: f64,
        /// Budget remaining at the time of the call.
        remaining: f64,
    },

    /// Every candidate in the fallback chain was tried and failed.
    #[error("All fallback candidates exhausted: {}", format_attempts(.attempts))]
    ExhaustedFallback {
        /// The full attempt history, in order.
        attempts: Vec<AttemptRecord>,
    },

    /// A task was scheduled before one of its dependencies reached a terminal state.
    #[error("Task '{task}' scheduled before dependency '{dependency}' finished")]
    DependencyUnsatisfied {
        /// The task that could not start.
        task: String,
        /// The dependency that was not terminal.
        dependency: String,
    },

    /// The task graph cannot make progress.
    #[error("Task deadlock: {} pending task(s) can never become ready: {}", .pending.len(), .pending.join(", "))]
    Deadlock {
        /// Names of the tasks left pending.
        pending: Vec<String>,
    },

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised while constructing or validating a task graph.
    #[error("Graph error: {0}")]
    Graph(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Returns the provider error if this error wraps one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            ConductorError::Provider(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this error stems from a fatal provider failure.
    ///
    /// An exhausted chain whose last real attempt failed fatally counts as
    /// fatal too, since retrying it would hit the same misconfiguration.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConductorError::Provider(e) => e.class() == FailureClass::Fatal,
            ConductorError::ExhaustedFallback { attempts } => attempts
                .iter()
                .rev()
                .find_map(|a| match &a.outcome {
                    AttemptOutcome::Failed { error } => Some(error.class() == FailureClass::Fatal),
                    _ => None,
                })
                .unwrap_or(false),
            ConductorError::BudgetExceeded { .. } => true,
            _ => false,
        }
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

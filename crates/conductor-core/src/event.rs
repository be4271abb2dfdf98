//! Lifecycle events emitted by the call layer and the scheduler.
//!
//! These types live in `conductor-core` so that both `conductor-agent`
//! (which emits breaker, fallback and budget events) and
//! `conductor-orchestrator` (which emits task events) can share one sink
//! without circular deps. What a sink does with an event (logging,
//! streaming, metrics) is up to the embedding application.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A discrete lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A task transitioned to `Running`.
    TaskStarted {
        /// Task name.
        task: String,
        /// Task role.
        role: String,
        /// 1-based iteration number (always 1 outside iterative mode).
        iteration: u32,
    },
    /// A task reached `Completed`.
    TaskCompleted {
        /// Task name.
        task: String,
        /// Task role.
        role: String,
        /// Id of the target that produced the kept output.
        target: String,
        /// Billed cost of every successful iteration, in USD.
        cost: f64,
        /// Time from first start to completion.
        duration_ms: u64,
    },
    /// A task reached `Failed`.
    TaskFailed {
        /// Task name.
        task: String,
        /// Task role.
        role: String,
        /// Error that ended the task.
        reason: String,
        /// Whether the failure fails the run.
        required: bool,
    },
    /// A task was skipped because a dependency cannot be satisfied.
    TaskSkipped {
        /// Task name.
        task: String,
        /// Which dependency blocked it.
        reason: String,
    },
    /// A circuit breaker tripped (Closed → Open or HalfOpen → Open).
    BreakerOpened {
        /// Id of the guarded target.
        target: String,
        /// Failures since the last success.
        consecutive_failures: u32,
    },
    /// A half-open trial succeeded and the breaker closed again.
    BreakerClosed {
        /// Id of the guarded target.
        target: String,
    },
    /// A call succeeded on a candidate other than the first one considered.
    FallbackUsed {
        /// First candidate considered.
        from: String,
        /// Candidate that served the call.
        to: String,
    },
    /// No candidate fit the remaining budget.
    BudgetExceeded {
        /// Estimate of the cheapest candidate, in USD.
        required: f64,
        /// Budget left, in USD.
        remaining: f64,
    },
}

impl LifecycleEvent {
    /// Short machine-readable name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskStarted { .. } => "task_started",
            LifecycleEvent::TaskCompleted { .. } => "task_completed",
            LifecycleEvent::TaskFailed { .. } => "task_failed",
            LifecycleEvent::TaskSkipped { .. } => "task_skipped",
            LifecycleEvent::BreakerOpened { .. } => "breaker_opened",
            LifecycleEvent::BreakerClosed { .. } => "breaker_closed",
            LifecycleEvent::FallbackUsed { .. } => "fallback_used",
            LifecycleEvent::BudgetExceeded { .. } => "budget_exceeded",
        }
    }
}

/// Receives lifecycle events.
///
/// Implementations must be cheap and non-blocking: events are emitted while
/// tasks are running, sometimes from inside the call layer.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &LifecycleEvent);
}

/// A sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// A sink that turns events into `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::TaskStarted {
                task,
                role,
                iteration,
            } => info!(task = %task, role = %role, iteration, "Task started"),
            LifecycleEvent::TaskCompleted {
                task,
                target,
                cost,
                duration_ms,
                ..
            } => info!(task = %task, target_id = %target, cost, duration_ms, "Task completed"),
            LifecycleEvent::TaskFailed {
                task,
                reason,
                required,
                ..
            } => warn!(task = %task, required, reason = %reason, "Task failed"),
            LifecycleEvent::TaskSkipped { task, reason } => {
                warn!(task = %task, reason = %reason, "Task skipped");
            }
            LifecycleEvent::BreakerOpened {
                target,
                consecutive_failures,
            } => warn!(target_id = %target, consecutive_failures, "Circuit breaker opened"),
            LifecycleEvent::BreakerClosed { target } => {
                info!(target_id = %target, "Circuit breaker closed");
            }
            LifecycleEvent::FallbackUsed { from, to } => {
                warn!(from = %from, to = %to, "Fallback target used");
            }
            LifecycleEvent::BudgetExceeded {
                required,
                remaining,
            } => warn!(required, remaining, "Budget exceeded"),
        }
    }
}

/// Forwards every event to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream sink.
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of downstream sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` if no sinks are attached.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

use crate::backends::openai::estimate_units;
use crate::backends::{BackendRegistry, Invocation};
use crate::breaker::{BreakerPermit, BreakerRegistry, BreakerTransition};
use crate::config::{CallPolicy, ConductorConfig};
use crate::cost::CostTracker;
use crate::target::{CallTarget, Tier};
use crate::tier::{SelectionContext, TierSelector};
use conductor_core::{
    AttemptOutcome, AttemptRecord, ConductorError, ConductorResult, EventSink, LifecycleEvent,
    NullSink, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Prompt and output limit of one resilient call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Rendered prompt.
    pub prompt: String,
    /// Defaults to the policy's `default_max_output_units`.
    #[serde(default)]
    pub max_output_units: Option<u32>,
}

impl CallRequest {
    /// Request with the policy's default output limit.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_units: None,
        }
    }

    /// Cap the completion length.
    pub fn with_max_output_units(mut self, units: u32) -> Self {
        self.max_output_units = Some(units);
        self
    }
}

/// Successful outcome of a resilient call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    /// Id of the target that served the call.
    pub target_used: String,
    /// Provider of `target_used`.
    pub provider: String,
    /// Model of `target_used`.
    pub model: String,
    /// Tier of `target_used`, which may be below the selected one.
    pub tier: Tier,
    /// Billed input units.
    pub input_units: u32,
    /// Billed output units.
    pub output_units: u32,
    /// Billed cost in USD.
    pub cost: f64,
    /// Duration of the serving attempt.
    pub latency: Duration,
    /// Served by a candidate other than the first one considered.
    pub did_fallback: bool,
    /// The selected tier sits below the requested quality floor.
    pub below_quality_threshold: bool,
    /// Completion text.
    pub output: String,
    /// Candidates that did not serve the call, in the order they were considered.
    pub attempts: Vec<AttemptRecord>,
}

/// Calls a selected tier's chain with breakers, budget checks and fallback.
///
/// Breakers and the cost tracker are shared handles: clone the caller (or
/// hand the same `Arc`s to several callers) and every call sees the same
/// breaker states and running spend.
#[derive(Clone)]
pub struct ResilientCaller {
    backends: BackendRegistry,
    selector: Arc<TierSelector>,
    breakers: Arc<BreakerRegistry>,
    tracker: Arc<CostTracker>,
    policy: CallPolicy,
    sink: Arc<dyn EventSink>,
}

impl ResilientCaller {
    /// Caller with default breakers, no spend ceiling and a silent sink.
    pub fn new(backends: BackendRegistry, selector: TierSelector) -> Self {
        Self {
            backends,
            selector: Arc::new(selector),
            breakers: Arc::new(BreakerRegistry::default()),
            tracker: Arc::new(CostTracker::unlimited()),
            policy: CallPolicy::default(),
            sink: Arc::new(NullSink),
        }
    }

    /// Wire a caller from configuration. Backends are supplied by the
    /// embedding application since they carry credentials.
    pub fn from_config(config: &ConductorConfig, backends: BackendRegistry) -> Self {
        Self::new(backends, TierSelector::from_config(config))
            .with_breakers(Arc::new(BreakerRegistry::new(config.breaker.clone())))
            .with_tracker(Arc::new(CostTracker::new(
                config.budget.ceiling_usd,
                config.budget.window,
            )))
            .with_policy(config.call.clone())
    }

    /// Share an existing breaker registry.
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Share an existing spend tracker.
    pub fn with_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replace the timeout and fatal-kind policy.
    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the sink that receives breaker, fallback and budget events.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The sink call-layer events go to.
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Per-target breakers.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Running spend.
    pub fn tracker(&self) -> &Arc<CostTracker> {
        &self.tracker
    }

    /// Tier routing table.
    pub fn selector(&self) -> &TierSelector {
        &self.selector
    }

    /// Timeout and fatal-kind policy.
    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Call with the tighter of the tracker's remaining budget and the
    /// context's per-request budget.
    pub async fn call(
        &self,
        ctx: &SelectionContext,
        request: &CallRequest,
    ) -> ConductorResult<CallResult> {
        let remaining = match (self.tracker.remaining(), ctx.budget) {
            (Some(window), Some(request_budget)) => Some(window.min(request_budget)),
            (window, request_budget) => window.or(request_budget),
        };
        self.call_with_budget(ctx, request, remaining).await
    }

    /// Call with an explicit remaining budget; `None` means unlimited.
    pub async fn call_with_budget(
        &self,
        ctx: &SelectionContext,
        request: &CallRequest,
        budget_remaining: Option<f64>,
    ) -> ConductorResult<CallResult> {
        let selection = self.selector.select_targets(ctx);
        let max_output_units = request
            .max_output_units
            .unwrap_or(self.policy.default_max_output_units);
        let estimated_input = estimate_units(&request.prompt);

        debug!(
            tier = %selection.tier(),
            candidates = selection.chain.len(),
            budget = ?budget_remaining,
            "Starting resilient call"
        );

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut first_considered: Option<String> = None;
        let mut invoked_any = false;
        let mut cheapest_over_budget: Option<f64> = None;

        let chains = std::iter::once(&selection.chain).chain(selection.fallback_tiers.iter());
        for (index, chain) in chains.enumerate() {
            if index > 0 && !(ctx.allow_quality_relaxation || cheapest_over_budget.is_some()) {
                break;
            }
            if index > 0 {
                info!(tier = %chain.tier, "Falling back to a lower tier");
            }

            let resolved = chain.resolve(&self.breakers);
            for target in chain.candidates() {
                let first = first_considered.get_or_insert_with(|| target.id.clone()).clone();
                if !resolved.iter().any(|t| t.id == target.id) {
                    debug!(target_id = %target.id, "Circuit open, skipping candidate");
                    attempts.push(AttemptRecord {
                        target: target.id.clone(),
                        outcome: AttemptOutcome::CircuitOpen,
                    });
                    continue;
                }

                let Some(backend) = self.backends.get(&target.provider) else {
                    warn!(target_id = %target.id, provider = %target.provider, "No backend registered for provider");
                    attempts.push(AttemptRecord {
                        target: target.id.clone(),
                        outcome: AttemptOutcome::Failed {
                            error: ProviderError::new(
                                conductor_core::FailureKind::MalformedRequest,
                                format!("no backend registered for provider '{}'", target.provider),
                            ),
                        },
                    });
                    continue;
                };

                let estimated = self.selector.cost_table().estimate(
                    &target.id,
                    estimated_input,
                    max_output_units,
                );
                if let Some(remaining) = budget_remaining {
                    if estimated > remaining {
                        debug!(target_id = %target.id, estimated, remaining, "Candidate over budget");
                        cheapest_over_budget = Some(
                            cheapest_over_budget.map_or(estimated, |c: f64| c.min(estimated)),
                        );
                        attempts.push(AttemptRecord {
                            target: target.id.clone(),
                            outcome: AttemptOutcome::OverBudget {
                                estimated,
                                remaining,
                            },
                        });
                        continue;
                    }
                }

                // Held across the invoke: dropping the call future releases
                // a half-open trial slot.
                let Some(permit) = self.breakers.get(&target.id).try_acquire() else {
                    debug!(target_id = %target.id, "Circuit open, skipping candidate");
                    attempts.push(AttemptRecord {
                        target: target.id.clone(),
                        outcome: AttemptOutcome::CircuitOpen,
                    });
                    continue;
                };

                invoked_any = true;
                let started = Instant::now();
                let timeout = self.policy.timeout();
                let result = match tokio::time::timeout(
                    timeout,
                    backend.invoke(&target, &request.prompt, max_output_units, timeout),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timeout(format!(
                        "no response within {}ms",
                        timeout.as_millis()
                    ))),
                };

                match result {
                    Ok(invocation) => {
                        return Ok(self.succeed(
                            &target,
                            permit,
                            invocation,
                            started.elapsed(),
                            &first,
                            selection.below_quality_threshold,
                            attempts,
                        ));
                    }
                    Err(error) => {
                        self.fail(&target, permit, &error);
                        let kind = error.kind;
                        attempts.push(AttemptRecord {
                            target: target.id.clone(),
                            outcome: AttemptOutcome::Failed {
                                error: error.clone(),
                            },
                        });
                        if !kind.is_transient() && !self.policy.is_target_specific(kind) {
                            warn!(target_id = %target.id, %kind, "Fatal provider error, aborting call");
                            return Err(ConductorError::Provider(error));
                        }
                    }
                }
            }
        }

        if !invoked_any {
            if let (Some(required), Some(remaining)) = (cheapest_over_budget, budget_remaining) {
                warn!(required, remaining, "No candidate fits the remaining budget");
                self.sink
                    .emit(&LifecycleEvent::BudgetExceeded { required, remaining });
                return Err(ConductorError::BudgetExceeded { required, remaining });
            }
        }

        warn!(attempts = attempts.len(), "All fallback candidates exhausted");
        Err(ConductorError::ExhaustedFallback { attempts })
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        target: &CallTarget,
        permit: BreakerPermit,
        invocation: Invocation,
        latency: Duration,
        first_considered: &str,
        below_quality_threshold: bool,
        attempts: Vec<AttemptRecord>,
    ) -> CallResult {
        if permit.record_success() == BreakerTransition::Closed {
            info!(target_id = %target.id, "Circuit breaker closed");
            self.sink.emit(&LifecycleEvent::BreakerClosed {
                target: target.id.clone(),
            });
        }

        let cost = self.selector.cost_table().estimate(
            &target.id,
            invocation.input_units,
            invocation.output_units,
        );
        let spent = self.tracker.record(cost);

        let did_fallback = target.id != first_considered;
        if did_fallback {
            info!(from = %first_considered, to = %target.id, "Fallback target served the call");
            self.sink.emit(&LifecycleEvent::FallbackUsed {
                from: first_considered.to_string(),
                to: target.id.clone(),
            });
        }

        debug!(
            target_id = %target.id,
            input_units = invocation.input_units,
            output_units = invocation.output_units,
            cost,
            spent,
            latency_ms = latency.as_millis() as u64,
            "Call succeeded"
        );

        CallResult {
            target_used: target.id.clone(),
            provider: target.provider.clone(),
            model: target.model.clone(),
            tier: target.tier,
            input_units: invocation.input_units,
            output_units: invocation.output_units,
            cost,
            latency,
            did_fallback,
            below_quality_threshold,
            output: invocation.output,
            attempts,
        }
    }

    fn fail(&self, target: &CallTarget, permit: BreakerPermit, error: &ProviderError) {
        warn!(target_id = %target.id, kind = %error.kind, error = %error.message, "Call attempt failed");
        let breaker = self.breakers.get(&target.id);
        if permit.record_failure() == BreakerTransition::Opened {
            let consecutive_failures = breaker.consecutive_failures();
            warn!(target_id = %target.id, consecutive_failures, "Circuit breaker opened");
            self.sink.emit(&LifecycleEvent::BreakerOpened {
                target: target.id.clone(),
                consecutive_failures,
            });
        }
    }
}

impl std::fmt::Debug for ResilientCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("backends", &self.backends)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

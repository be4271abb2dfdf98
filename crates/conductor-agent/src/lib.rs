//! Resilient multi-provider call layer.
//!
//! A [`ResilientCaller`] turns a [`SelectionContext`] into a tier via the
//! [`TierSelector`], then walks that tier's [`FallbackChain`] guarded by one
//! [`CircuitBreaker`] per target and a shared [`CostTracker`].

/// Provider backends and the registry that maps providers to them.
pub mod backends;
/// Per-target circuit breakers.
pub mod breaker;
/// The resilient caller.
pub mod caller;
/// TOML configuration.
pub mod config;
/// Prices and the shared spend tracker.
pub mod cost;
/// Ordered fallback chains.
pub mod fallback;
/// Call targets and tiers.
pub mod target;
/// Tier selection.
pub mod tier;

pub use backends::openai::OpenAiCompatBackend;
pub use backends::{BackendRegistry, Invocation, LlmBackend};
pub use breaker::{BreakerPermit, BreakerRegistry, BreakerState, BreakerTransition, CircuitBreaker};
pub use caller::{CallRequest, CallResult, ResilientCaller};
pub use config::{
    BreakerConfig, BudgetConfig, CallPolicy, ConductorConfig, EngineConfig, QualityFloors,
    SelectorConfig, TierMapping,
};
pub use cost::{BudgetWindow, CostTable, CostTracker, Price};
pub use fallback::FallbackChain;
pub use target::{CallTarget, LatencyClass, Tier};
pub use tier::{Complexity, SelectionContext, TierSelection, TierSelector, TierTable};

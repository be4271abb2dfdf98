use crate::cost::BudgetWindow;
use crate::target::{CallTarget, Tier};
use crate::tier::Complexity;
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Circuit breaker policy shared by every target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open a breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time an open breaker waits before admitting a trial.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl BreakerConfig {
    /// `cooldown_ms` as a `Duration`.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Per-attempt policy of the resilient caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPolicy {
    /// Deadline of a single attempt; exceeding it is a transient failure.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Output limit for requests that do not set one.
    #[serde(default = "default_max_output_units")]
    pub default_max_output_units: u32,
    /// Fatal failure kinds that only concern one provider (e.g. a bad key)
    /// and therefore move on to the next candidate instead of aborting.
    #[serde(default = "default_target_specific_fatal")]
    pub target_specific_fatal: Vec<FailureKind>,
}

impl CallPolicy {
    /// `timeout_ms` as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether a fatal `kind` moves on to the next candidate.
    pub fn is_target_specific(&self, kind: FailureKind) -> bool {
        self.target_specific_fatal.contains(&kind)
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            default_max_output_units: default_max_output_units(),
            target_specific_fatal: default_target_specific_fatal(),
        }
    }
}

/// Shared spend ceiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Spend cap in USD; unset means unlimited.
    #[serde(default)]
    pub ceiling_usd: Option<f64>,
    /// Period after which spend resets.
    #[serde(default)]
    pub window: BudgetWindow,
}

/// Minimum expected quality score of each tier, in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityFloors {
    /// Floor of the premium tier.
    #[serde(default = "default_premium_floor")]
    pub premium: f64,
    /// Floor of the standard tier.
    #[serde(default = "default_standard_floor")]
    pub standard: f64,
    /// Floor of the economy tier.
    #[serde(default = "default_economy_floor")]
    pub economy: f64,
}

impl QualityFloors {
    /// Floor of `tier`.
    pub fn floor(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Premium => self.premium,
            Tier::Standard => self.standard,
            Tier::Economy => self.economy,
        }
    }
}

impl Default for QualityFloors {
    fn default() -> Self {
        Self {
            premium: default_premium_floor(),
            standard: default_standard_floor(),
            economy: default_economy_floor(),
        }
    }
}

/// Override of one (task type, complexity) → tier mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierMapping {
    /// Task type label, e.g. `code_generation`.
    pub task_type: String,
    /// Complexity the mapping applies to.
    pub complexity: Complexity,
    /// Tier to use.
    pub tier: Tier,
}

/// Tier selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// How many tiers a tight budget may step down.
    #[serde(default = "default_max_downgrade_steps")]
    pub max_downgrade_steps: u32,
    /// Request size used to estimate the typical cost of a tier.
    #[serde(default = "default_typical_input_units")]
    pub typical_input_units: u32,
    /// Output side of the typical request.
    #[serde(default = "default_typical_output_units")]
    pub typical_output_units: u32,
    /// Fixed per-request cost estimates that replace the computed ones.
    /// Keyed by tier name.
    #[serde(default)]
    pub typical_cost: BTreeMap<String, f64>,
    /// Expected quality per tier.
    #[serde(default)]
    pub quality_floors: QualityFloors,
    /// Entries that override the built-in tier table.
    #[serde(default)]
    pub mappings: Vec<TierMapping>,
    /// Explicit chain order per tier name, by target id. Tiers not listed
    /// use the declaration order of `targets`.
    #[serde(default)]
    pub chains: BTreeMap<String, Vec<String>>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_downgrade_steps: default_max_downgrade_steps(),
            typical_input_units: default_typical_input_units(),
            typical_output_units: default_typical_output_units(),
            typical_cost: BTreeMap::new(),
            quality_floors: QualityFloors::default(),
            mappings: Vec::new(),
            chains: BTreeMap::new(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running tasks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Top-level configuration, usually loaded from `conductor.toml`.
///
/// ```toml
/// [breaker]
/// failure_threshold = 3
/// cooldown_ms = 30000
///
/// [budget]
/// ceiling_usd = 5.0
/// window = "daily"
///
/// [[targets]]
/// id = "claude-opus"
/// provider = "anthropic"
/// model = "claude-opus-4"
/// tier = "premium"
/// price_per_input_unit = 0.015
/// price_per_output_unit = 0.075
/// latency_class = "slow"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// `[breaker]`
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// `[call]`
    #[serde(default)]
    pub call: CallPolicy,
    /// `[budget]`
    #[serde(default)]
    pub budget: BudgetConfig,
    /// `[selector]`
    #[serde(default)]
    pub selector: SelectorConfig,
    /// `[engine]`
    #[serde(default)]
    pub engine: EngineConfig,
    /// `[[targets]]`, in declaration order.
    #[serde(default)]
    pub targets: Vec<CallTarget>,
}

impl ConductorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConductorResult<Self> {
        let config: ConductorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the caller cannot run with.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConductorError::Config(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.engine.max_workers == 0 {
            return Err(ConductorError::Config(
                "engine.max_workers must be at least 1".into(),
            ));
        }
        if self.call.timeout_ms == 0 {
            return Err(ConductorError::Config("call.timeout_ms must be positive".into()));
        }
        if let Some(ceiling) = self.budget.ceiling_usd {
            if ceiling < 0.0 {
                return Err(ConductorError::Config(
                    "budget.ceiling_usd must not be negative".into(),
                ));
            }
        }

        let mut ids = HashSet::new();
        for target in &self.targets {
            if !ids.insert(target.id.as_str()) {
                return Err(ConductorError::Config(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
            if target.price_per_input_unit < 0.0 || target.price_per_output_unit < 0.0 {
                return Err(ConductorError::Config(format!(
                    "target '{}' has a negative price",
                    target.id
                )));
            }
        }

        for name in self.selector.typical_cost.keys() {
            name.parse::<Tier>()?;
        }

        for (name, chain) in &self.selector.chains {
            let tier: Tier = name.parse()?;
            for id in chain {
                let target = self
                    .targets
                    .iter()
                    .find(|t| &t.id == id)
                    .ok_or_else(|| {
                        ConductorError::Config(format!(
                            "chain for tier '{tier}' references unknown target '{id}'"
                        ))
                    })?;
                if target.tier != tier {
                    return Err(ConductorError::Config(format!(
                        "target '{id}' is {} but listed in the {tier} chain",
                        target.tier
                    )));
                }
            }
        }

        Ok(())
    }

    /// Configured per-request cost override for a tier.
    pub fn typical_cost_override(&self, tier: Tier) -> Option<f64> {
        self.selector
            .typical_cost
            .iter()
            .find(|(name, _)| name.parse::<Tier>().ok() == Some(tier))
            .map(|(_, cost)| *cost)
    }

    /// Targets of one tier in chain order.
    pub fn chain_for(&self, tier: Tier) -> Vec<CallTarget> {
        let configured = self
            .selector
            .chains
            .iter()
            .find(|(name, _)| name.parse::<Tier>().ok() == Some(tier))
            .map(|(_, order)| order);
        match configured {
            Some(order) => order
                .iter()
                .filter_map(|id| self.targets.iter().find(|t| &t.id == id))
                .cloned()
                .collect(),
            None => self
                .targets
                .iter()
                .filter(|t| t.tier == tier)
                .cloned()
                .collect(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_output_units() -> u32 {
    1024
}
fn default_target_specific_fatal() -> Vec<FailureKind> {
    vec![FailureKind::Auth]
}
fn default_premium_floor() -> f64 {
    0.9
}
fn default_standard_floor() -> f64 {
    0.75
}
fn default_economy_floor() -> f64 {
    0.5
}
fn default_max_downgrade_steps() -> u32 {
    1
}
fn default_typical_input_units() -> u32 {
    1000
}
fn default_typical_output_units() -> u32 {
    500
}
fn default_max_workers() -> usize {
    4
}

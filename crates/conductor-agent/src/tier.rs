use crate::config::{ConductorConfig, QualityFloors};
use crate::cost::CostTable;
use crate::fallback::FallbackChain;
use crate::target::{CallTarget, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// How demanding a task is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Lookups, formatting, short extraction.
    Simple,
    /// Default.
    #[default]
    Moderate,
    /// Multi-step reasoning or long outputs.
    Complex,
    /// Mistakes are expensive.
    Critical,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
            Complexity::Critical => write!(f, "critical"),
        }
    }
}

/// Static (task type, complexity) → tier mapping.
///
/// Pairs without an entry map to [`Tier::Standard`].
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    entries: HashMap<(String, Complexity), Tier>,
}

impl TierTable {
    /// A table without any entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Map a (task type, complexity) pair to a tier.
    pub fn set(&mut self, task_type: impl Into<String>, complexity: Complexity, tier: Tier) {
        self.entries.insert((task_type.into(), complexity), tier);
    }

    /// Tier for a pair, `Standard` when unmapped.
    pub fn lookup(&self, task_type: &str, complexity: Complexity) -> Tier {
        self.entries
            .get(&(task_type.to_string(), complexity))
            .copied()
            .unwrap_or(Tier::Standard)
    }

    /// Number of mapped pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No pair mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Built-in mapping for the common agent task types.
    pub fn builtin() -> Self {
        use Complexity::{Complex, Critical, Moderate, Simple};
        use Tier::{Economy, Premium, Standard};

        let rows: [(&str, [Tier; 4]); 7] = [
            ("analysis", [Economy, Standard, Premium, Premium]),
            ("code_generation", [Standard, Standard, Premium, Premium]),
            ("summarization", [Economy, Economy, Standard, Standard]),
            ("validation", [Economy, Standard, Standard, Premium]),
            ("extraction", [Economy, Economy, Standard, Standard]),
            ("planning", [Standard, Standard, Premium, Premium]),
            ("review", [Standard, Standard, Premium, Premium]),
        ];

        let mut table = Self::empty();
        for (task_type, tiers) in rows {
            for (complexity, tier) in [Simple, Moderate, Complex, Critical].into_iter().zip(tiers) {
                table.set(task_type, complexity, tier);
            }
        }
        table
    }
}

/// Constraints used to pick a call target. Immutable per call attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionContext {
    /// Key into the tier table, e.g. `analysis`.
    pub task_type: String,
    /// Second key into the tier table.
    #[serde(default)]
    pub complexity: Complexity,
    /// Per-request budget ceiling in USD.
    #[serde(default)]
    pub budget: Option<f64>,
    /// Targets slower than this move to the back of the chain.
    #[serde(default)]
    pub max_latency: Option<Duration>,
    /// Minimum acceptable quality score in `0.0..=1.0`.
    #[serde(default)]
    pub min_quality: Option<f64>,
    /// Targets of this provider move to the front of the chain.
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Target id to try first when it belongs to the selected tier.
    #[serde(default)]
    pub preferred_target: Option<String>,
    /// Whether lower tiers may be tried once the selected tier's chain is exhausted.
    #[serde(default)]
    pub allow_quality_relaxation: bool,
}

impl SelectionContext {
    /// Context without budget, latency or quality constraints.
    pub fn new(task_type: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            task_type: task_type.into(),
            complexity,
            ..Self::default()
        }
    }

    /// Set the per-request budget in USD.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Set the latency ceiling.
    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    /// Set the minimum quality score.
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Prefer a provider.
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Prefer a target.
    pub fn with_preferred_target(mut self, target: impl Into<String>) -> Self {
        self.preferred_target = Some(target.into());
        self
    }

    /// Let the caller fall through to lower tiers.
    pub fn allowing_quality_relaxation(mut self) -> Self {
        self.allow_quality_relaxation = true;
        self
    }
}

/// Outcome of tier selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TierSelection {
    /// Tier from the static table, before budget and quality adjustments.
    pub base_tier: Tier,
    /// Selected chain, reordered for the context.
    pub chain: FallbackChain,
    /// The selected tier's quality floor is below `min_quality` and no
    /// affordable upgrade existed. Reacting to it is up to the caller.
    pub below_quality_threshold: bool,
    /// Chains of the cheaper tiers, nearest first, reordered the same way.
    pub fallback_tiers: Vec<FallbackChain>,
}

impl TierSelection {
    /// Tier of the selected chain.
    pub fn tier(&self) -> Tier {
        self.chain.tier
    }

    /// Targets of the selected chain.
    pub fn targets(&self) -> &[CallTarget] {
        &self.chain.targets
    }
}

/// Maps a selection context to a tier and then to an ordered chain of targets.
#[derive(Debug, Clone)]
pub struct TierSelector {
    table: TierTable,
    chains: HashMap<Tier, FallbackChain>,
    costs: CostTable,
    typical_cost: HashMap<Tier, f64>,
    typical_input_units: u32,
    typical_output_units: u32,
    quality_floors: QualityFloors,
    max_downgrade_steps: u32,
}

impl TierSelector {
    /// Create a selector over the given chains with the built-in tier table.
    pub fn new(chains: Vec<FallbackChain>) -> Self {
        let costs = CostTable::from_targets(chains.iter().flat_map(|c| c.targets.iter()));
        Self {
            table: TierTable::builtin(),
            chains: chains.into_iter().map(|c| (c.tier, c)).collect(),
            costs,
            typical_cost: HashMap::new(),
            typical_input_units: 1000,
            typical_output_units: 500,
            quality_floors: QualityFloors::default(),
            max_downgrade_steps: 1,
        }
    }

    /// Build a selector from configuration: targets grouped into chains,
    /// built-in table plus configured overrides.
    pub fn from_config(config: &ConductorConfig) -> Self {
        let chains = Tier::ALL
            .into_iter()
            .map(|tier| FallbackChain::new(tier, config.chain_for(tier)))
            .collect();

        let mut selector = Self::new(chains)
            .with_max_downgrade_steps(config.selector.max_downgrade_steps)
            .with_quality_floors(config.selector.quality_floors)
            .with_typical_units(
                config.selector.typical_input_units,
                config.selector.typical_output_units,
            );
        for tier in Tier::ALL {
            if let Some(cost) = config.typical_cost_override(tier) {
                selector = selector.with_typical_cost(tier, cost);
            }
        }
        for mapping in &config.selector.mappings {
            selector
                .table
                .set(mapping.task_type.clone(), mapping.complexity, mapping.tier);
        }
        selector
    }

    /// Replace the tier table.
    pub fn with_table(mut self, table: TierTable) -> Self {
        self.table = table;
        self
    }

    /// Fix the per-request cost estimate of a tier instead of computing it.
    pub fn with_typical_cost(mut self, tier: Tier, cost: f64) -> Self {
        self.typical_cost.insert(tier, cost);
        self
    }

    /// Request size used for computed tier costs.
    pub fn with_typical_units(mut self, input_units: u32, output_units: u32) -> Self {
        self.typical_input_units = input_units;
        self.typical_output_units = output_units;
        self
    }

    /// Replace the per-tier quality floors.
    pub fn with_quality_floors(mut self, floors: QualityFloors) -> Self {
        self.quality_floors = floors;
        self
    }

    /// How many tiers a tight budget may step down.
    pub fn with_max_downgrade_steps(mut self, steps: u32) -> Self {
        self.max_downgrade_steps = steps;
        self
    }

    /// The tier table.
    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// Prices of every target in every chain.
    pub fn cost_table(&self) -> &CostTable {
        &self.costs
    }

    /// Chain of a tier, in configured order.
    pub fn chain(&self, tier: Tier) -> Option<&FallbackChain> {
        self.chains.get(&tier)
    }

    /// Estimated cost of one typical request on this tier: the configured
    /// override, or the mean over its chain. `None` for an empty tier.
    pub fn typical_cost(&self, tier: Tier) -> Option<f64> {
        if let Some(cost) = self.typical_cost.get(&tier) {
            return Some(*cost);
        }
        let chain = self.populated(tier)?;
        let total: f64 = chain
            .targets
            .iter()
            .map(|t| {
                self.costs
                    .estimate(&t.id, self.typical_input_units, self.typical_output_units)
            })
            .sum();
        Some(total / chain.targets.len() as f64)
    }

    /// Pick the tier for `ctx` and return its chain, ordered for the context.
    pub fn select_targets(&self, ctx: &SelectionContext) -> TierSelection {
        let base_tier = self.table.lookup(&ctx.task_type, ctx.complexity);
        let mut tier = base_tier;

        if let Some(budget) = ctx.budget {
            let mut steps = 0;
            while steps < self.max_downgrade_steps {
                let over = self.typical_cost(tier).is_some_and(|cost| cost > budget);
                match tier.downgrade() {
                    Some(lower) if over => {
                        tier = lower;
                        steps += 1;
                    }
                    _ => break,
                }
            }
        }

        let mut below_quality_threshold = false;
        if let Some(min_quality) = ctx.min_quality {
            if self.quality_floors.floor(tier) < min_quality {
                let upgrade = tier.upgrade().filter(|up| {
                    self.populated(*up).is_some() && self.fits_budget(*up, ctx.budget)
                });
                match upgrade {
                    Some(up) => {
                        tier = up;
                        below_quality_threshold = self.quality_floors.floor(up) < min_quality;
                    }
                    None => below_quality_threshold = true,
                }
            }
        }

        let tier = self.nearest_populated(tier);
        let chain = FallbackChain::new(tier, self.ordered(tier, ctx));
        let fallback_tiers = tier
            .lower_tiers()
            .into_iter()
            .filter(|t| self.populated(*t).is_some())
            .map(|t| FallbackChain::new(t, self.ordered(t, ctx)))
            .collect();

        debug!(
            task_type = %ctx.task_type,
            complexity = %ctx.complexity,
            base_tier = %base_tier,
            tier = %tier,
            below_quality_threshold,
            "Tier selected"
        );

        TierSelection {
            base_tier,
            chain,
            below_quality_threshold,
            fallback_tiers,
        }
    }

    fn fits_budget(&self, tier: Tier, budget: Option<f64>) -> bool {
        match (budget, self.typical_cost(tier)) {
            (Some(budget), Some(cost)) => cost <= budget,
            _ => true,
        }
    }

    fn populated(&self, tier: Tier) -> Option<&FallbackChain> {
        self.chains.get(&tier).filter(|c| !c.is_empty())
    }

    /// `tier` if it has targets, else the nearest cheaper populated tier,
    /// else the nearest more capable one.
    fn nearest_populated(&self, tier: Tier) -> Tier {
        if self.populated(tier).is_some() {
            return tier;
        }
        if let Some(lower) = tier
            .lower_tiers()
            .into_iter()
            .find(|t| self.populated(*t).is_some())
        {
            return lower;
        }
        let mut current = tier;
        while let Some(up) = current.upgrade() {
            if self.populated(up).is_some() {
                return up;
            }
            current = up;
        }
        tier
    }

    /// The tier's chain, stable-sorted: preferred target, then targets
    /// fitting the latency ceiling, then the preferred provider.
    fn ordered(&self, tier: Tier, ctx: &SelectionContext) -> Vec<CallTarget> {
        let mut targets = self
            .chains
            .get(&tier)
            .map(|c| c.targets.clone())
            .unwrap_or_default();
        targets.sort_by_key(|t| {
            let not_hinted = ctx.preferred_target.as_deref() != Some(t.id.as_str());
            let too_slow = ctx
                .max_latency
                .is_some_and(|max| !t.latency_class.fits(max));
            let other_provider = ctx
                .preferred_provider
                .as_deref()
                .is_some_and(|p| p != t.provider);
            (not_hinted, too_slow, other_provider)
        });
        targets
    }
}

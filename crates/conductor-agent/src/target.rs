use conductor_core::ConductorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quality/cost class grouping call targets of similar capability.
///
/// Ordered from most to least capable, so `Tier::Premium < Tier::Economy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Most capable and most expensive.
    Premium,
    /// Default tier.
    Standard,
    /// Cheapest.
    Economy,
}

impl Tier {
    /// All tiers, most capable first.
    pub const ALL: [Tier; 3] = [Tier::Premium, Tier::Standard, Tier::Economy];

    /// The next cheaper tier, if any.
    pub fn downgrade(self) -> Option<Tier> {
        match self {
            Tier::Premium => Some(Tier::Standard),
            Tier::Standard => Some(Tier::Economy),
            Tier::Economy => None,
        }
    }

    /// The next more capable tier, if any.
    pub fn upgrade(self) -> Option<Tier> {
        match self {
            Tier::Premium => None,
            Tier::Standard => Some(Tier::Premium),
            Tier::Economy => Some(Tier::Standard),
        }
    }

    /// Every tier strictly cheaper than this one, nearest first.
    pub fn lower_tiers(self) -> Vec<Tier> {
        let mut tiers = Vec::new();
        let mut current = self;
        while let Some(next) = current.downgrade() {
            tiers.push(next);
            current = next;
        }
        tiers
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Premium => write!(f, "premium"),
            Tier::Standard => write!(f, "standard"),
            Tier::Economy => write!(f, "economy"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "premium" => Ok(Tier::Premium),
            "standard" => Ok(Tier::Standard),
            "economy" => Ok(Tier::Economy),
            other => Err(ConductorError::Config(format!("unknown tier '{other}'"))),
        }
    }
}

/// Typical response latency of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    /// Around two seconds.
    Fast,
    /// Around eight seconds.
    #[default]
    Medium,
    /// Around twenty seconds.
    Slow,
}

impl LatencyClass {
    /// Representative latency used when matching against a latency ceiling.
    pub fn typical(self) -> Duration {
        match self {
            LatencyClass::Fast => Duration::from_secs(2),
            LatencyClass::Medium => Duration::from_secs(8),
            LatencyClass::Slow => Duration::from_secs(20),
        }
    }

    /// Returns `true` if targets of this class usually answer within `max`.
    pub fn fits(self, max: Duration) -> bool {
        self.typical() <= max
    }
}

/// One callable (provider, model) endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTarget {
    /// Unique identifier, also the key of its circuit breaker.
    pub id: String,
    /// Provider name; selects the backend that serves this target.
    pub provider: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Tier the target serves.
    pub tier: Tier,
    /// USD per 1 000 input units.
    pub price_per_input_unit: f64,
    /// USD per 1 000 output units.
    pub price_per_output_unit: f64,
    /// Typical latency, matched against `max_latency`.
    #[serde(default)]
    pub latency_class: LatencyClass,
}

impl CallTarget {
    /// Target with zero prices and medium latency.
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        tier: Tier,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            tier,
            price_per_input_unit: 0.0,
            price_per_output_unit: 0.0,
            latency_class: LatencyClass::default(),
        }
    }

    /// Set USD per 1 000 input and output units.
    pub fn with_prices(mut self, per_input: f64, per_output: f64) -> Self {
        self.price_per_input_unit = per_input;
        self.price_per_output_unit = per_output;
        self
    }

    /// Set the latency class.
    pub fn with_latency(mut self, latency_class: LatencyClass) -> Self {
        self.latency_class = latency_class;
        self
    }
}

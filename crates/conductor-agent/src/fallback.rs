use crate::breaker::BreakerRegistry;
use crate::target::{CallTarget, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered list of call targets for one tier, primary first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackChain {
    /// Tier every target of the chain belongs to.
    pub tier: Tier,
    /// Primary first.
    pub targets: Vec<CallTarget>,
}

impl FallbackChain {
    /// Chain over `targets` in the given order.
    pub fn new(tier: Tier, targets: Vec<CallTarget>) -> Self {
        Self { tier, targets }
    }

    /// First target.
    pub fn primary(&self) -> Option<&CallTarget> {
        self.targets.first()
    }

    /// Number of targets, duplicates included.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// No targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets in chain order with duplicates removed.
    pub fn candidates(&self) -> Vec<CallTarget> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .filter(|t| seen.insert(t.id.as_str()))
            .cloned()
            .collect()
    }

    /// The candidates worth trying right now.
    ///
    /// Targets whose breaker is open are filtered out. If that leaves
    /// nothing, the last open entry is kept as a last resort so the caller
    /// still gets a chance once its cooldown has elapsed.
    pub fn resolve(&self, breakers: &BreakerRegistry) -> Vec<CallTarget> {
        let candidates = self.candidates();
        let mut last_open = None;
        let mut usable = Vec::with_capacity(candidates.len());
        for target in candidates {
            if breakers.is_open(&target.id) {
                last_open = Some(target);
            } else {
                usable.push(target);
            }
        }
        if usable.is_empty() {
            usable.extend(last_open);
        }
        usable
    }
}

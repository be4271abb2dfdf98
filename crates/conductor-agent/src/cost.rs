use crate::target::CallTarget;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price of one target, USD per 1 000 units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// USD per 1 000 input units.
    pub per_input: f64,
    /// USD per 1 000 output units.
    pub per_output: f64,
}

impl Price {
    /// Cost of a call with the given unit counts.
    pub fn cost(&self, input_units: u32, output_units: u32) -> f64 {
        (f64::from(input_units) * self.per_input + f64::from(output_units) * self.per_output)
            / 1000.0
    }
}

/// Price per unit of input/output for every known call target.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    prices: HashMap<String, Price>,
}

impl CostTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the price of every target.
    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a CallTarget>) -> Self {
        let mut table = Self::new();
        for target in targets {
            table.register(target);
        }
        table
    }

    /// Add or replace the price of `target`.
    pub fn register(&mut self, target: &CallTarget) {
        self.prices.insert(
            target.id.clone(),
            Price {
                per_input: target.price_per_input_unit,
                per_output: target.price_per_output_unit,
            },
        );
    }

    /// Price of a target.
    pub fn price(&self, target_id: &str) -> Option<Price> {
        self.prices.get(target_id).copied()
    }

    /// Cost of a call with the given unit counts. Unknown targets cost nothing.
    pub fn estimate(&self, target_id: &str, input_units: u32, output_units: u32) -> f64 {
        self.price(target_id)
            .map(|p| p.cost(input_units, output_units))
            .unwrap_or(0.0)
    }

    /// Number of priced targets.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// No target priced.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Time window a budget ceiling applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindow {
    /// Resets at the top of every UTC hour.
    Hourly,
    /// Resets at UTC midnight.
    #[default]
    Daily,
    /// Never rolls over; only an explicit reset clears the total.
    Unbounded,
}

impl BudgetWindow {
    /// Start of the window containing `now`.
    fn start_of(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BudgetWindow::Hourly => now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now),
            BudgetWindow::Daily => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc())
                .unwrap_or(now),
            BudgetWindow::Unbounded => DateTime::<Utc>::MIN_UTC,
        }
    }
}

#[derive(Debug)]
struct TrackerState {
    spent: f64,
    calls: u64,
    window_start: DateTime<Utc>,
}

/// Running spend shared by every concurrent call.
///
/// The total rolls over when the wall clock leaves the current window.
#[derive(Debug)]
pub struct CostTracker {
    ceiling: Option<f64>,
    window: BudgetWindow,
    state: Mutex<TrackerState>,
}

impl CostTracker {
    /// Tracker with an optional ceiling, starting at zero spend.
    pub fn new(ceiling: Option<f64>, window: BudgetWindow) -> Self {
        Self {
            ceiling,
            window,
            state: Mutex::new(TrackerState {
                spent: 0.0,
                calls: 0,
                window_start: window.start_of(Utc::now()),
            }),
        }
    }

    /// A tracker without a ceiling.
    pub fn unlimited() -> Self {
        Self::new(None, BudgetWindow::Unbounded)
    }

    /// Spend cap in USD.
    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    /// Roll-over window.
    pub fn window(&self) -> BudgetWindow {
        self.window
    }

    /// Add a billed call to the running total and return the new total.
    pub fn record(&self, cost: f64) -> f64 {
        self.record_at(cost, Utc::now())
    }

    /// [`record`](Self::record) at an explicit time.
    pub fn record_at(&self, cost: f64, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        state.spent += cost.max(0.0);
        state.calls += 1;
        state.spent
    }

    /// Spend in the current window.
    pub fn spent(&self) -> f64 {
        self.spent_at(Utc::now())
    }

    /// [`spent`](Self::spent) at an explicit time.
    pub fn spent_at(&self, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        state.spent
    }

    /// Number of billed calls in the current window.
    pub fn calls(&self) -> u64 {
        let mut state = self.state.lock();
        self.roll(&mut state, Utc::now());
        state.calls
    }

    /// Budget left in the current window; `None` when there is no ceiling.
    pub fn remaining(&self) -> Option<f64> {
        self.remaining_at(Utc::now())
    }

    /// [`remaining`](Self::remaining) at an explicit time.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let ceiling = self.ceiling?;
        Some((ceiling - self.spent_at(now)).max(0.0))
    }

    /// Operator action: clear the running total.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.spent = 0.0;
        state.calls = 0;
        state.window_start = self.window.start_of(Utc::now());
    }

    fn roll(&self, state: &mut TrackerState, now: DateTime<Utc>) {
        let start = self.window.start_of(now);
        if start > state.window_start {
            state.spent = 0.0;
            state.calls = 0;
            state.window_start = start;
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}

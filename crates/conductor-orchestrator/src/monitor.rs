use chrono::{DateTime, Utc};
use conductor_core::{EventSink, LifecycleEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A lifecycle event with the time it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// When the event arrived.
    pub at: DateTime<Utc>,
    /// The event itself.
    pub event: LifecycleEvent,
}

/// Per-role counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleMetrics {
    /// Task starts, one per iteration.
    pub started: u32,
    /// Tasks completed.
    pub completed: u32,
    /// Tasks failed.
    pub failed: u32,
    /// Cost of completed tasks, in USD.
    pub total_cost: f64,
    /// Summed duration of completed tasks.
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    events: Vec<RecordedEvent>,
    roles: BTreeMap<String, RoleMetrics>,
}

/// Records every lifecycle event and aggregates metrics per role.
#[derive(Debug, Default)]
pub struct RunMonitor {
    state: RwLock<MonitorState>,
}

impl RunMonitor {
    /// Empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.read().events.clone()
    }

    /// Events of one kind, by [`LifecycleEvent::name`].
    pub fn events_named(&self, name: &str) -> Vec<LifecycleEvent> {
        self.state
            .read()
            .events
            .iter()
            .filter(|r| r.event.name() == name)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Counters of one role, if any of its tasks started.
    pub fn role_metrics(&self, role: &str) -> Option<RoleMetrics> {
        self.state.read().roles.get(role).cloned()
    }

    /// Get aggregate metrics across all roles.
    pub fn aggregate_metrics(&self) -> RoleMetrics {
        let state = self.state.read();
        let mut total = RoleMetrics::default();
        for metrics in state.roles.values() {
            total.started += metrics.started;
            total.completed += metrics.completed;
            total.failed += metrics.failed;
            total.total_cost += metrics.total_cost;
            total.duration_ms += metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.state.read();
        serde_json::json!({
            "events": state.events,
            "roles": state.roles,
        })
    }

    /// Forget every event and counter.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.events.clear();
        state.roles.clear();
    }
}

impl EventSink for RunMonitor {
    fn emit(&self, event: &LifecycleEvent) {
        let mut state = self.state.write();
        match event {
            LifecycleEvent::TaskStarted { role, .. } => {
                state.roles.entry(role.clone()).or_default().started += 1;
            }
            LifecycleEvent::TaskCompleted {
                role,
                cost,
                duration_ms,
                ..
            } => {
                let metrics = state.roles.entry(role.clone()).or_default();
                metrics.completed += 1;
                metrics.total_cost += cost;
                metrics.duration_ms += duration_ms;
            }
            LifecycleEvent::TaskFailed { role, .. } => {
                state.roles.entry(role.clone()).or_default().failed += 1;
            }
            _ => {}
        }
        state.events.push(RecordedEvent {
            at: Utc::now(),
            event: event.clone(),
        });
    }
}

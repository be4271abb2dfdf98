use super::{Pool, SchedulingStrategy};
use crate::engine::{ExecutionMode, RunContext, RunFailure};
use crate::graph::TaskGraph;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Starts tasks as soon as their dependencies are satisfied, up to
/// `max_workers` at a time, until the graph is resolved or deadlocked.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdaptiveStrategy;

#[async_trait]
impl SchedulingStrategy for AdaptiveStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Adaptive
    }

    async fn schedule(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure> {
        let cyclic = detect_cycles(graph);
        let failure = Pool {
            respect_dependencies: true,
            iterative: false,
        }
        .run(graph, ctx)
        .await;
        name_cyclic_deadlock(failure, cyclic)
    }
}

/// Tasks on a dependency cycle, logged once before the run starts.
///
/// Nothing is skipped: the rest of the graph still runs, and the cyclic
/// tasks (and whatever depends on them) stay Pending until the pool
/// deadlocks.
pub(crate) fn detect_cycles(graph: &TaskGraph) -> Vec<String> {
    if !graph.has_cycle() {
        return Vec::new();
    }
    let cyclic = graph.cyclic_tasks();
    warn!(tasks = ?cyclic, "Dependency cycle detected, cyclic tasks will never run");
    cyclic
}

/// A deadlock caused by a cycle names the cyclic tasks.
pub(crate) fn name_cyclic_deadlock(
    failure: Option<RunFailure>,
    cyclic: Vec<String>,
) -> Option<RunFailure> {
    match failure {
        Some(RunFailure::Deadlock { .. }) if !cyclic.is_empty() => {
            Some(RunFailure::Deadlock { pending: cyclic })
        }
        other => other,
    }
}

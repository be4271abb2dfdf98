use super::{Pool, SchedulingStrategy};
use crate::engine::{ExecutionMode, RunContext, RunFailure};
use crate::graph::TaskGraph;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Runs every task concurrently, bounded by `max_workers`.
///
/// Tasks are treated as independent: declared dependencies are ignored and
/// a failure never prevents another task from starting.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelStrategy;

#[async_trait]
impl SchedulingStrategy for ParallelStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    async fn schedule(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure> {
        for task in graph.tasks().iter().filter(|t| !t.dependencies.is_empty()) {
            warn!(
                task = %task.name,
                dependencies = ?task.dependencies,
                "Parallel mode ignores declared dependencies"
            );
        }
        Pool {
            respect_dependencies: false,
            iterative: false,
        }
        .run(graph, ctx)
        .await
    }
}

use super::SchedulingStrategy;
use crate::engine::{self, ExecutionMode, RunContext, RunFailure};
use crate::graph::TaskGraph;
use crate::types::TaskStatus;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Runs tasks one at a time in input order.
///
/// A dependency that has not finished yet when its dependent is reached is
/// a run-level error. The first failed required task aborts the run and
/// every task not yet started is skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialStrategy;

#[async_trait]
impl SchedulingStrategy for SequentialStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn schedule(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure> {
        for name in graph.names() {
            let Some(task) = graph.get(&name) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }

            if graph.blocked_by(&name).is_some() {
                engine::skip_blocked(graph, ctx);
                continue;
            }

            let unfinished = task
                .dependencies
                .iter()
                .find(|d| !graph.is_satisfied(d))
                .cloned();
            if let Some(dependency) = unfinished {
                error!(task = %name, %dependency, "Task scheduled before its dependency finished");
                let reason = format!("dependency '{dependency}' has not finished");
                engine::fail(graph, ctx, &name, reason);
                engine::skip_pending(graph, ctx, "run aborted");
                return Some(RunFailure::DependencyUnsatisfied {
                    task: name,
                    dependency,
                });
            }

            let Some(call) = engine::dispatch(graph, ctx, &name, 1, None) else {
                continue;
            };
            let attempt = call.await;
            engine::settle(graph, ctx, attempt);

            let failed_required = graph.get(&name).is_some_and(|t| {
                t.required && matches!(t.status, TaskStatus::Failed { .. })
            });
            if failed_required {
                engine::skip_blocked(graph, ctx);
                engine::skip_pending(graph, ctx, &format!("run aborted after '{name}' failed"));
                break;
            }
        }

        engine::required_failure(graph)
    }
}

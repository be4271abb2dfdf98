//! Scheduling strategies, one per [`ExecutionMode`].

/// Ready-set scheduling.
pub mod adaptive;
/// Ready-set scheduling with refinement.
pub mod iterative;
/// Dependency-blind concurrent scheduling.
pub mod parallel;
/// One task at a time in input order.
pub mod sequential;

pub use adaptive::AdaptiveStrategy;
pub use iterative::IterativeStrategy;
pub use parallel::ParallelStrategy;
pub use sequential::SequentialStrategy;

use crate::engine::{self, Attempt, ExecutionMode, RunContext, RunFailure};
use crate::graph::TaskGraph;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Drives a task graph to completion.
#[async_trait]
pub trait SchedulingStrategy: Send + Sync {
    /// The mode this strategy implements.
    fn mode(&self) -> ExecutionMode;

    /// Run every task it can; returns the run-level failure, if any.
    /// Task outcomes are written back into `graph`.
    async fn schedule(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure>;
}

/// The strategy that implements `mode`.
pub fn for_mode(mode: ExecutionMode) -> Box<dyn SchedulingStrategy> {
    match mode {
        ExecutionMode::Sequential => Box::new(SequentialStrategy),
        ExecutionMode::Parallel => Box::new(ParallelStrategy),
        ExecutionMode::Adaptive => Box::new(AdaptiveStrategy),
        ExecutionMode::Iterative => Box::new(IterativeStrategy),
    }
}

/// Bounded worker pool shared by the concurrent strategies.
///
/// At most `max_workers` tasks are in flight; each holds a semaphore permit
/// until its call returns.
pub(crate) struct Pool {
    /// Only start tasks whose dependencies are satisfied, skip blocked ones
    /// and report a deadlock when nothing can run.
    pub respect_dependencies: bool,
    /// Route attempts through the refinement loop.
    pub iterative: bool,
}

impl Pool {
    pub async fn run(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure> {
        let permits = Arc::new(Semaphore::new(ctx.max_workers.max(1)));
        let mut in_flight: JoinSet<Attempt> = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut refinements: HashMap<String, iterative::Refinement> = HashMap::new();

        loop {
            if self.respect_dependencies {
                engine::skip_blocked(graph, ctx);
            }

            let mut candidates = graph.retrying();
            if self.respect_dependencies {
                candidates.extend(graph.ready_set());
            } else {
                candidates.extend(graph.pending());
            }

            for name in candidates {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    break;
                };
                let (iteration, previous) = match refinements.get(&name) {
                    Some(r) => (r.iteration + 1, r.previous_content()),
                    None => (1, None),
                };
                if let Some(call) = engine::dispatch(graph, ctx, &name, iteration, previous) {
                    let handle = in_flight.spawn(async move {
                        let attempt = call.await;
                        drop(permit);
                        attempt
                    });
                    names.insert(handle.id(), name);
                }
            }

            if in_flight.is_empty() {
                let pending = graph.pending();
                if pending.is_empty() {
                    break;
                }
                error!(tasks = ?pending, "Task deadlock: pending tasks can never become ready");
                return Some(RunFailure::Deadlock { pending });
            }

            match in_flight.join_next().await {
                Some(Ok(attempt)) => {
                    names.retain(|_, n| *n != attempt.name);
                    debug!(task = %attempt.name, iteration = attempt.iteration, "Attempt finished");
                    if self.iterative {
                        iterative::settle(graph, ctx, &mut refinements, attempt);
                    } else {
                        engine::settle(graph, ctx, attempt);
                    }
                }
                Some(Err(join_error)) => {
                    if let Some(name) = names.remove(&join_error.id()) {
                        let reason = format!("task aborted: {join_error}");
                        if self.iterative {
                            iterative::abort(graph, ctx, &mut refinements, &name, reason);
                        } else {
                            engine::fail(graph, ctx, &name, reason);
                        }
                    }
                }
                None => {}
            }
        }

        engine::required_failure(graph)
    }
}

use super::adaptive::{detect_cycles, name_cyclic_deadlock};
use super::{Pool, SchedulingStrategy};
use crate::engine::{self, Attempt, ExecutionMode, RunContext, RunFailure};
use crate::graph::TaskGraph;
use crate::types::TaskOutput;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Adaptive ordering with a bounded refinement loop per task.
///
/// After each successful iteration the run's [`RefinementPolicy`] decides
/// whether to go again, up to the task's `max_iterations`. Between
/// iterations the task is Retrying and frees its worker slot. A failed
/// iteration after an earlier success keeps the earlier output.
///
/// [`RefinementPolicy`]: crate::refine::RefinementPolicy
#[derive(Debug, Default, Clone, Copy)]
pub struct IterativeStrategy;

#[async_trait]
impl SchedulingStrategy for IterativeStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Iterative
    }

    async fn schedule(&self, graph: &mut TaskGraph, ctx: &Arc<RunContext>) -> Option<RunFailure> {
        let cyclic = detect_cycles(graph);
        let failure = Pool {
            respect_dependencies: true,
            iterative: true,
        }
        .run(graph, ctx)
        .await;
        name_cyclic_deadlock(failure, cyclic)
    }
}

/// Refinement progress of one task.
#[derive(Debug, Default)]
pub(crate) struct Refinement {
    pub iteration: u32,
    /// Last successful output.
    pub best: Option<TaskOutput>,
    /// Billed cost of every successful iteration so far.
    pub cost: f64,
}

impl Refinement {
    /// Output handed to the next iteration's prompt.
    pub fn previous_content(&self) -> Option<String> {
        self.best.as_ref().map(|b| b.content.clone())
    }
}

/// Record one iteration and decide between Retrying and a terminal state.
pub(crate) fn settle(
    graph: &mut TaskGraph,
    ctx: &RunContext,
    refinements: &mut HashMap<String, Refinement>,
    attempt: Attempt,
) {
    let Some(task) = graph.get(&attempt.name).cloned() else {
        return;
    };
    let state = refinements.entry(attempt.name.clone()).or_default();
    state.iteration = attempt.iteration;
    let below_ceiling = attempt.iteration < task.max_iterations;

    match attempt.result {
        Ok(call) => {
            state.cost += call.cost;
            let current = TaskOutput {
                content: call.output.clone(),
                call,
                iterations: attempt.iteration,
                cost: state.cost,
            };
            let refine = below_ceiling
                && ctx
                    .refinement
                    .should_refine(&task, &current, state.best.as_ref());
            if refine {
                debug!(task = %task.name, iteration = attempt.iteration, "Refining output");
                state.best = Some(current);
                graph.mark_retrying(&task.name);
            } else {
                state.best = None;
                engine::complete(graph, ctx, &task.name, current);
            }
        }
        Err(e) => {
            if below_ceiling && !e.is_fatal() {
                warn!(task = %task.name, iteration = attempt.iteration, error = %e, "Iteration failed, retrying");
                graph.mark_retrying(&task.name);
            } else {
                finish_with_best(graph, ctx, state, &task.name, e.to_string());
            }
        }
    }
}

/// An iteration that never reported back (it panicked or was cancelled).
/// Same as a final failed iteration: keep an earlier output if there is one.
pub(crate) fn abort(
    graph: &mut TaskGraph,
    ctx: &RunContext,
    refinements: &mut HashMap<String, Refinement>,
    name: &str,
    reason: String,
) {
    let state = refinements.entry(name.to_string()).or_default();
    state.iteration += 1;
    finish_with_best(graph, ctx, state, name, reason);
}

fn finish_with_best(
    graph: &mut TaskGraph,
    ctx: &RunContext,
    state: &mut Refinement,
    name: &str,
    reason: String,
) {
    match state.best.take() {
        Some(mut best) => {
            warn!(task = %name, iteration = state.iteration, error = %reason, "Iteration failed, keeping earlier output");
            best.iterations = state.iteration;
            best.cost = state.cost;
            engine::complete(graph, ctx, name, best);
        }
        None => engine::fail(graph, ctx, name, reason),
    }
}

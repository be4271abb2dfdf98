use crate::graph::TaskGraph;
use crate::prompt::{PromptBuilder, TemplatePromptBuilder};
use crate::refine::{RefinementPolicy, UntilStable};
use crate::strategy;
use crate::types::{Task, TaskOutput, TaskStatus};
use conductor_agent::{CallRequest, CallResult, EngineConfig, ResilientCaller};
use conductor_core::{ConductorResult, EventSink, FanoutSink, LifecycleEvent, NullSink};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a run schedules its tasks. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Input order, one task at a time; the first required failure aborts.
    Sequential,
    /// Everything at once up to `max_workers`; dependencies are ignored.
    Parallel,
    /// Ready tasks as soon as their dependencies allow.
    #[default]
    Adaptive,
    /// Adaptive ordering, each task refined over several iterations.
    Iterative,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Adaptive => write!(f, "adaptive"),
            ExecutionMode::Iterative => write!(f, "iterative"),
        }
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum RunFailure {
    /// Tasks remain pending but none can ever become ready.
    Deadlock {
        /// Tasks that can never run.
        pending: Vec<String>,
    },
    /// Sequential mode reached a task before one of its dependencies finished.
    DependencyUnsatisfied {
        /// Task that was reached too early.
        task: String,
        /// Dependency that had not finished.
        dependency: String,
    },
    /// One or more required tasks failed.
    RequiredTaskFailed {
        /// Failed required tasks that were not themselves skipped.
        root_causes: Vec<String>,
    },
    /// Duplicate task names or dependencies on unknown tasks.
    InvalidGraph {
        /// Validation error.
        reason: String,
    },
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFailure::Deadlock { pending } => {
                write!(f, "deadlock: {} can never run", pending.join(", "))
            }
            RunFailure::DependencyUnsatisfied { task, dependency } => write!(
                f,
                "task '{task}' scheduled before dependency '{dependency}' finished"
            ),
            RunFailure::RequiredTaskFailed { root_causes } => {
                write!(f, "required task(s) failed: {}", root_causes.join(", "))
            }
            RunFailure::InvalidGraph { reason } => write!(f, "invalid task graph: {reason}"),
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique per run; also on the run's log records.
    pub run_id: Uuid,
    /// Mode the run was scheduled with.
    pub mode: ExecutionMode,
    /// Every task in input order, in its final state.
    pub task_results: Vec<Task>,
    /// Billed cost of every completed task, in USD.
    pub total_cost: f64,
    /// Wall time from start to the last settled task.
    pub total_duration: Duration,
    /// Tasks that ended Failed.
    pub failed_tasks: Vec<String>,
    /// Tasks that ended Skipped.
    pub skipped_tasks: Vec<String>,
    /// Run-level failure, if any.
    pub failure: Option<RunFailure>,
}

impl RunResult {
    /// No run-level failure.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// A task's final state by name.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.task_results.iter().find(|t| t.name == name)
    }

    /// A completed task's output text.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.task(name)?.output()
    }
}

/// Everything a run shares: the caller and the injected collaborators.
pub struct RunContext {
    /// Call layer every task goes through.
    pub caller: Arc<ResilientCaller>,
    /// Renders each task into a prompt.
    pub prompt_builder: Arc<dyn PromptBuilder>,
    /// Decides whether an iterative task goes another round.
    pub refinement: Arc<dyn RefinementPolicy>,
    /// Receives task events, and call-layer events once set through
    /// [`with_sink`](Self::with_sink).
    pub sink: Arc<dyn EventSink>,
    /// Upper bound on concurrently running tasks.
    pub max_workers: usize,
    /// The caller's own sink, kept so a later `with_sink` adds to it
    /// rather than replacing it.
    call_layer_sink: Arc<dyn EventSink>,
}

impl RunContext {
    /// Context with the template prompt builder and `UntilStable` refinement.
    pub fn new(caller: Arc<ResilientCaller>) -> Self {
        let call_layer_sink = Arc::clone(caller.sink());
        Self {
            caller,
            prompt_builder: Arc::new(TemplatePromptBuilder),
            refinement: Arc::new(UntilStable),
            sink: Arc::new(NullSink),
            max_workers: EngineConfig::default().max_workers,
            call_layer_sink,
        }
    }

    /// Replace the prompt builder.
    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    /// Replace the refinement policy.
    pub fn with_refinement(mut self, policy: Arc<dyn RefinementPolicy>) -> Self {
        self.refinement = policy;
        self
    }

    /// Send task events to `sink`, and breaker, fallback and budget events
    /// from the caller to both its own sink and `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        let forwarded = FanoutSink::new()
            .with(Arc::clone(&self.call_layer_sink))
            .with(Arc::clone(&sink));
        self.caller = Arc::new((*self.caller).clone().with_sink(Arc::new(forwarded)));
        self.sink = sink;
        self
    }

    /// Cap concurrent tasks; zero is raised to one.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Apply `[engine]` settings.
    pub fn with_engine_config(self, config: &EngineConfig) -> Self {
        self.with_max_workers(config.max_workers)
    }
}

/// Runs task graphs against a shared [`RunContext`].
pub struct ExecutionEngine {
    ctx: Arc<RunContext>,
}

impl ExecutionEngine {
    /// Engine over a run context.
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// The shared run context.
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Execute `tasks` with the given mode.
    ///
    /// Never fails: task errors are recorded on the tasks and run-level
    /// problems are reported in [`RunResult::failure`].
    pub async fn run_graph(&self, tasks: Vec<Task>, mode: ExecutionMode) -> RunResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, %mode, tasks = tasks.len(), "Run started");

        let (task_results, failure) = match TaskGraph::new(tasks.clone()) {
            Ok(mut graph) => {
                let failure = strategy::for_mode(mode).schedule(&mut graph, &self.ctx).await;
                (graph.into_tasks(), failure)
            }
            Err(e) => {
                error!(%run_id, error = %e, "Rejected task graph");
                (
                    tasks,
                    Some(RunFailure::InvalidGraph {
                        reason: e.to_string(),
                    }),
                )
            }
        };

        let graph_view = |pred: fn(&Task) -> bool| -> Vec<String> {
            task_results
                .iter()
                .filter(|t| pred(t))
                .map(|t| t.name.clone())
                .collect()
        };
        let failed_tasks = graph_view(|t| matches!(t.status, TaskStatus::Failed { .. }));
        let skipped_tasks = graph_view(|t| matches!(t.status, TaskStatus::Skipped { .. }));
        let total_cost: f64 = task_results
            .iter()
            .filter_map(|t| t.result.as_ref())
            .map(|r| r.cost)
            .sum();
        let total_duration = started.elapsed();

        match &failure {
            Some(f) => error!(%run_id, failure = %f, "Run failed"),
            None => info!(
                %run_id,
                total_cost,
                duration_ms = total_duration.as_millis() as u64,
                "Run completed"
            ),
        }

        RunResult {
            run_id,
            mode,
            task_results,
            total_cost,
            total_duration,
            failed_tasks,
            skipped_tasks,
            failure,
        }
    }
}

// --- Shared task lifecycle helpers used by every strategy ---

/// The result of one dispatched iteration.
pub(crate) struct Attempt {
    pub name: String,
    pub iteration: u32,
    pub result: ConductorResult<CallResult>,
}

/// Mark `name` Running, emit `TaskStarted` and build the call future.
///
/// Returns `None` if the task is not Pending or Retrying.
pub(crate) fn dispatch(
    graph: &mut TaskGraph,
    ctx: &Arc<RunContext>,
    name: &str,
    iteration: u32,
    previous: Option<String>,
) -> Option<impl Future<Output = Attempt> + Send + 'static> {
    if !graph.mark_running(name) {
        return None;
    }
    let task = graph.get(name)?.clone();
    let dependency_outputs = graph.dependency_outputs(name);

    info!(task = %task.name, role = %task.role, iteration, "Task started");
    ctx.sink.emit(&LifecycleEvent::TaskStarted {
        task: task.name.clone(),
        role: task.role.clone(),
        iteration,
    });

    let ctx = Arc::clone(ctx);
    Some(async move {
        let prompt = ctx
            .prompt_builder
            .render(&task, &dependency_outputs, previous.as_deref());
        let request = CallRequest {
            prompt,
            max_output_units: task.max_output_units,
        };
        let result = ctx.caller.call(&task.selection_context(), &request).await;
        Attempt {
            name: task.name,
            iteration,
            result,
        }
    })
}

/// Record the outcome of a single-shot attempt.
pub(crate) fn settle(graph: &mut TaskGraph, ctx: &RunContext, attempt: Attempt) {
    match attempt.result {
        Ok(call) => {
            let output = TaskOutput {
                content: call.output.clone(),
                cost: call.cost,
                iterations: attempt.iteration,
                call,
            };
            complete(graph, ctx, &attempt.name, output);
        }
        Err(e) => fail(graph, ctx, &attempt.name, e.to_string()),
    }
}

pub(crate) fn complete(graph: &mut TaskGraph, ctx: &RunContext, name: &str, output: TaskOutput) {
    let target = output.call.target_used.clone();
    let cost = output.cost;
    graph.mark_completed(name, output);
    let Some(task) = graph.get(name) else {
        return;
    };
    let duration_ms = task.duration().map(|d| d.as_millis() as u64).unwrap_or(0);
    info!(task = %name, target_id = %target, cost, duration_ms, "Task completed");
    ctx.sink.emit(&LifecycleEvent::TaskCompleted {
        task: name.to_string(),
        role: task.role.clone(),
        target,
        cost,
        duration_ms,
    });
}

pub(crate) fn fail(graph: &mut TaskGraph, ctx: &RunContext, name: &str, reason: String) {
    graph.mark_failed(name, reason.clone());
    let Some(task) = graph.get(name) else {
        return;
    };
    warn!(task = %name, required = task.required, error = %reason, "Task failed");
    ctx.sink.emit(&LifecycleEvent::TaskFailed {
        task: name.to_string(),
        role: task.role.clone(),
        reason,
        required: task.required,
    });
}

pub(crate) fn skip(graph: &mut TaskGraph, ctx: &RunContext, name: &str, reason: String) {
    graph.mark_skipped(name, reason.clone());
    emit_skipped(ctx, name, reason);
}

/// Skip every pending task whose dependencies can no longer be satisfied.
pub(crate) fn skip_blocked(graph: &mut TaskGraph, ctx: &RunContext) {
    for (name, reason) in graph.propagate_skips() {
        emit_skipped(ctx, &name, reason);
    }
}

/// Skip every task still pending, e.g. after an abort.
pub(crate) fn skip_pending(graph: &mut TaskGraph, ctx: &RunContext, reason: &str) {
    for name in graph.pending() {
        skip(graph, ctx, &name, reason.to_string());
    }
}

fn emit_skipped(ctx: &RunContext, name: &str, reason: String) {
    warn!(task = %name, %reason, "Task skipped");
    ctx.sink.emit(&LifecycleEvent::TaskSkipped {
        task: name.to_string(),
        reason,
    });
}

/// `RequiredTaskFailed` if any required task failed.
pub(crate) fn required_failure(graph: &TaskGraph) -> Option<RunFailure> {
    let root_causes = graph.root_causes();
    if root_causes.is_empty() {
        None
    } else {
        Some(RunFailure::RequiredTaskFailed { root_causes })
    }
}

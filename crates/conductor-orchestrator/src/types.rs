use chrono::{DateTime, Utc};
use conductor_agent::{CallResult, Complexity, SelectionContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status of a task in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started yet.
    Pending,
    /// A call is in flight.
    Running,
    /// Between two iterations of an iterative run.
    Retrying,
    /// Finished with an output.
    Completed,
    /// Finished without an output.
    Failed {
        /// Error of the last attempt.
        reason: String,
    },
    /// Never ran because a dependency cannot be satisfied.
    Skipped {
        /// Which dependency blocked it.
        reason: String,
    },
}

impl TaskStatus {
    /// Completed, Failed or Skipped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { reason } => write!(f, "failed: {reason}"),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Terminal result of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Output text handed to dependents.
    pub content: String,
    /// Metadata of the call that produced `content`.
    pub call: CallResult,
    /// Iterations executed, including the ones that were not kept.
    pub iterations: u32,
    /// Billed cost of every successful iteration, in USD.
    pub cost: f64,
}

/// A unit of work: one logical LLM call plus its scheduling metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique within a graph; dependencies refer to it.
    pub name: String,
    /// Opaque label, passed through to prompts and metrics.
    pub role: String,
    /// Instruction text, rendered by the prompt builder.
    pub prompt: String,
    /// Names of the tasks whose outputs this one needs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// A failed required task blocks its dependents and fails the run.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Refinement ceiling in iterative mode.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Key into the tier table.
    #[serde(default)]
    pub task_type: String,
    /// Second key into the tier table.
    #[serde(default)]
    pub complexity: Complexity,
    /// Target id to try first.
    #[serde(default)]
    pub target_hint: Option<String>,
    /// Per-call budget in USD.
    #[serde(default)]
    pub budget: Option<f64>,
    /// Latency ceiling for target ordering.
    #[serde(default)]
    pub max_latency: Option<Duration>,
    /// Minimum quality score in `0.0..=1.0`.
    #[serde(default)]
    pub min_quality: Option<f64>,
    /// Provider to try first.
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Whether calls may fall through to lower tiers.
    #[serde(default)]
    pub allow_quality_relaxation: bool,
    /// Completion length cap.
    #[serde(default)]
    pub max_output_units: Option<u32>,
    /// Current state.
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    /// Set once Completed.
    #[serde(default)]
    pub result: Option<TaskOutput>,
    /// First transition to Running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Transition to a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

fn default_required() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    1
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    /// Required single-shot task without dependencies.
    pub fn new(name: impl Into<String>, role: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            prompt: prompt.into(),
            dependencies: Vec::new(),
            required: true,
            max_iterations: 1,
            task_type: String::new(),
            complexity: Complexity::default(),
            target_hint: None,
            budget: None,
            max_latency: None,
            min_quality: None,
            preferred_provider: None,
            allow_quality_relaxation: false,
            max_output_units: None,
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tier table keys.
    pub fn with_task_type(mut self, task_type: impl Into<String>, complexity: Complexity) -> Self {
        self.task_type = task_type.into();
        self.complexity = complexity;
        self
    }

    /// A failure of this task neither blocks dependents nor fails the run.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set the refinement ceiling; zero is raised to one.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Try this target first.
    pub fn with_target_hint(mut self, target: impl Into<String>) -> Self {
        self.target_hint = Some(target.into());
        self
    }

    /// Set the per-call budget.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Set the latency ceiling.
    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    /// Set the minimum quality score.
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Prefer a provider.
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Let calls fall through to lower tiers.
    pub fn allowing_quality_relaxation(mut self) -> Self {
        self.allow_quality_relaxation = true;
        self
    }

    /// Cap the completion length.
    pub fn with_max_output_units(mut self, units: u32) -> Self {
        self.max_output_units = Some(units);
        self
    }

    /// Constraints handed to the tier selector for this task's calls.
    pub fn selection_context(&self) -> SelectionContext {
        SelectionContext {
            task_type: self.task_type.clone(),
            complexity: self.complexity,
            budget: self.budget,
            max_latency: self.max_latency,
            min_quality: self.min_quality,
            preferred_provider: self.preferred_provider.clone(),
            preferred_target: self.target_hint.clone(),
            allow_quality_relaxation: self.allow_quality_relaxation,
        }
    }

    /// Wall-clock time between first start and finish.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        (finished - started).to_std().ok()
    }

    /// Output of a completed task.
    pub fn output(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.content.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("fetch", "fetcher", "Fetch the page");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.required);
        assert_eq!(task.max_iterations, 1);
        assert!(task.dependencies.is_empty());
        assert!(task.output().is_none());
    }

    #[test]
    fn test_selection_context_carries_constraints() {
        let task = Task::new("report", "writer", "Summarize")
            .with_task_type("summarization", Complexity::Complex)
            .with_budget(0.05)
            .with_min_quality(0.8)
            .with_preferred_provider("anthropic")
            .with_target_hint("sonnet")
            .allowing_quality_relaxation();
        let ctx = task.selection_context();
        assert_eq!(ctx.task_type, "summarization");
        assert_eq!(ctx.complexity, Complexity::Complex);
        assert_eq!(ctx.budget, Some(0.05));
        assert_eq!(ctx.min_quality, Some(0.8));
        assert_eq!(ctx.preferred_provider.as_deref(), Some("anthropic"));
        assert_eq!(ctx.preferred_target.as_deref(), Some("sonnet"));
        assert!(ctx.allow_quality_relaxation);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed { reason: "x".into() }.is_terminal());
        assert!(TaskStatus::Skipped { reason: "x".into() }.is_terminal());
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "analyze",
            "role": "analyst",
            "prompt": "Analyze it",
            "dependencies": ["fetch"],
            "complexity": "critical"
        }))
        .unwrap();
        assert_eq!(task.dependencies, vec!["fetch"]);
        assert!(task.required);
        assert_eq!(task.complexity, Complexity::Critical);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_max_iterations_is_at_least_one() {
        let task = Task::new("t", "r", "p").with_max_iterations(0);
        assert_eq!(task.max_iterations, 1);
    }
}

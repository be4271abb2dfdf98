use crate::types::{Task, TaskOutput, TaskStatus};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::{HashMap, HashSet};

/// Tasks of one run with their dependency edges, in insertion order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Build a graph, rejecting duplicate names and unknown dependencies.
    /// Cycles are allowed here; schedulers detect them before running.
    pub fn new(tasks: Vec<Task>) -> ConductorResult<Self> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.name.clone(), i).is_some() {
                return Err(ConductorError::Graph(format!(
                    "duplicate task name '{}'",
                    task.name
                )));
            }
        }
        for task in &tasks {
            if let Some(dep) = task.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(ConductorError::Graph(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.name
                )));
            }
        }
        Ok(Self { tasks, index })
    }

    /// Task by name.
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// Mutable task by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.index.get(name).map(|&i| &mut self.tasks[i])
    }

    /// Every task, in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Consume the graph, keeping insertion order.
    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// Task names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// No tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// A dependency is satisfied once Completed, or Failed while optional.
    pub fn is_satisfied(&self, dependency: &str) -> bool {
        self.get(dependency).is_some_and(|t| match t.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed { .. } => !t.required,
            _ => false,
        })
    }

    /// A dependency blocks for good when it was Skipped or a required task Failed.
    pub fn blocks(&self, dependency: &str) -> bool {
        self.get(dependency).is_some_and(|t| match t.status {
            TaskStatus::Skipped { .. } => true,
            TaskStatus::Failed { .. } => t.required,
            _ => false,
        })
    }

    /// Pending with every dependency satisfied.
    pub fn is_ready(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| {
            t.status == TaskStatus::Pending && t.dependencies.iter().all(|d| self.is_satisfied(d))
        })
    }

    /// Every ready task, in insertion order. Pure: calling it twice without
    /// a state change in between returns the same set.
    pub fn ready_set(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| self.is_ready(&t.name))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Tasks waiting for their next iteration, in insertion order.
    pub fn retrying(&self) -> Vec<String> {
        self.with_status(|s| *s == TaskStatus::Retrying)
    }

    /// Pending tasks, in insertion order.
    pub fn pending(&self) -> Vec<String> {
        self.with_status(|s| *s == TaskStatus::Pending)
    }

    /// Tasks currently Running.
    pub fn running_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    /// All tasks are Completed, Failed or Skipped.
    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// First dependency of `name` that blocks it for good.
    pub fn blocked_by(&self, name: &str) -> Option<String> {
        self.get(name)?
            .dependencies
            .iter()
            .find(|d| self.blocks(d))
            .cloned()
    }

    /// Skip every Pending task with a blocking dependency, transitively.
    /// Returns the newly skipped tasks with their reasons, in the order
    /// they were skipped.
    pub fn propagate_skips(&mut self) -> Vec<(String, String)> {
        let mut skipped = Vec::new();
        loop {
            let mut changed = false;
            for i in 0..self.tasks.len() {
                if self.tasks[i].status != TaskStatus::Pending {
                    continue;
                }
                let name = self.tasks[i].name.clone();
                if let Some(dep) = self.blocked_by(&name) {
                    let reason = self.skip_reason(&dep);
                    self.mark_skipped(&name, reason.clone());
                    skipped.push((name, reason));
                    changed = true;
                }
            }
            if !changed {
                return skipped;
            }
        }
    }

    fn skip_reason(&self, dependency: &str) -> String {
        match self.get(dependency).map(|t| &t.status) {
            Some(TaskStatus::Failed { .. }) => format!("dependency '{dependency}' failed"),
            _ => format!("dependency '{dependency}' was skipped"),
        }
    }

    /// Required tasks that Failed; the root causes of a failed run.
    pub fn root_causes(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.required && matches!(t.status, TaskStatus::Failed { .. }))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Failed tasks, in insertion order.
    pub fn failed(&self) -> Vec<String> {
        self.with_status(|s| matches!(s, TaskStatus::Failed { .. }))
    }

    /// Skipped tasks, in insertion order.
    pub fn skipped(&self) -> Vec<String> {
        self.with_status(|s| matches!(s, TaskStatus::Skipped { .. }))
    }

    /// Outputs of the completed dependencies of `name`, in declaration order.
    pub fn dependency_outputs(&self, name: &str) -> Vec<(String, String)> {
        let Some(task) = self.get(name) else {
            return Vec::new();
        };
        task.dependencies
            .iter()
            .filter_map(|d| {
                let dep = self.get(d)?;
                Some((d.clone(), dep.output()?.to_string()))
            })
            .collect()
    }

    /// Check for cycles in the dependency graph.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        self.tasks
            .iter()
            .any(|t| self.dfs_cycle(&t.name, &mut visited))
    }

    fn dfs_cycle<'a>(&'a self, name: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(name) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(name, 1);
        if let Some(task) = self.get(name) {
            for dep in &task.dependencies {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(name, 2);
        false
    }

    /// Tasks that lie on a dependency cycle, in insertion order.
    pub fn cyclic_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| self.reaches(&t.name, &t.name))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Whether following dependencies from `from` leads to `to`.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack: Vec<&str> = self
            .get(from)
            .map(|t| t.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(task) = self.get(current) {
                stack.extend(task.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    // --- State transitions ---

    /// Pending or Retrying → Running. Keeps the first start time.
    pub fn mark_running(&mut self, name: &str) -> bool {
        match self.get_mut(name) {
            Some(task) if matches!(task.status, TaskStatus::Pending | TaskStatus::Retrying) => {
                task.status = TaskStatus::Running;
                task.started_at.get_or_insert_with(Utc::now);
                true
            }
            _ => false,
        }
    }

    /// Running → Retrying. `false` if the task is not Running.
    pub fn mark_retrying(&mut self, name: &str) -> bool {
        match self.get_mut(name) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Retrying;
                true
            }
            _ => false,
        }
    }

    /// Record the kept output and finish the task.
    pub fn mark_completed(&mut self, name: &str, output: TaskOutput) -> bool {
        if let Some(task) = self.get_mut(name) {
            task.status = TaskStatus::Completed;
            task.result = Some(output);
            task.finished_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    /// Finish the task as Failed.
    pub fn mark_failed(&mut self, name: &str, reason: String) -> bool {
        if let Some(task) = self.get_mut(name) {
            task.status = TaskStatus::Failed { reason };
            task.finished_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    /// Finish the task as Skipped.
    pub fn mark_skipped(&mut self, name: &str, reason: String) -> bool {
        if let Some(task) = self.get_mut(name) {
            task.status = TaskStatus::Skipped { reason };
            task.finished_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    fn with_status(&self, pred: impl Fn(&TaskStatus) -> bool) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| pred(&t.status))
            .map(|t| t.name.clone())
            .collect()
    }
}

//! Dependency-aware task scheduling on top of the resilient call layer.
//!
//! A run takes a list of [`Task`]s, validates them into a [`TaskGraph`] and
//! drives the graph with one of four [`ExecutionMode`]s. Every LLM call goes
//! through the shared [`ResilientCaller`](conductor_agent::ResilientCaller),
//! so tier selection, fallback, circuit breaking and budgets apply to each
//! task without the scheduler knowing about them.
//!
//! # Main types
//!
//! - [`ExecutionEngine`]: runs a graph and returns a [`RunResult`].
//! - [`TaskGraph`]: task lookup, readiness, skip propagation and cycle detection.
//! - [`RunMonitor`]: an event sink that records lifecycle events and per-role metrics.
//! - [`PromptBuilder`] and [`RefinementPolicy`]: injected prompt rendering and
//!   the "refine again?" decision of iterative runs.

/// Execution engine, run context and run results.
pub mod engine;
/// Validated task graph.
pub mod graph;
/// Lifecycle event recording and per-role metrics.
pub mod monitor;
/// Prompt rendering from dependency outputs.
pub mod prompt;
/// Refinement policies for iterative runs.
pub mod refine;
/// One scheduling strategy per execution mode.
pub mod strategy;
/// Task, status and output types.
pub mod types;

pub use engine::{ExecutionEngine, ExecutionMode, RunContext, RunFailure, RunResult};
pub use graph::TaskGraph;
pub use monitor::{RecordedEvent, RoleMetrics, RunMonitor};
pub use prompt::{PromptBuilder, TemplatePromptBuilder};
pub use refine::{NoRefinement, RefineWith, RefinementPolicy, UntilStable};
pub use strategy::{
    AdaptiveStrategy, IterativeStrategy, ParallelStrategy, SchedulingStrategy, SequentialStrategy,
};
pub use types::{Task, TaskOutput, TaskStatus};

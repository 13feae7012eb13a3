//! Workflow orchestration for the Convoy agent fleet.
//!
//! Registers workflow templates, executes their phases in order against
//! role-matched agents, asks a decision oracle how collaboration work should
//! fan out, and samples fleet performance on fixed cadences.
//!
//! # Main types
//!
//! - [`WorkflowOrchestrator`]: Template store, run lifecycle, collaboration and shutdown.
//! - [`AgentRegistry`]: Agents, best-agent selection, job queues and leases.
//! - [`DecisionOracle`]: Pluggable strategy oracle ([`FixedOracle`], [`WeightedOracle`]).
//! - [`PerformanceMonitor`]: Bounded agent, workflow and health samples.
//! - [`TaskHandler`]: Per-role work executor.

/// Multi-agent collaboration strategies.
pub mod collaboration;
/// Orchestrator and monitor configuration.
pub mod config;
/// Named success criteria.
pub mod criteria;
/// Workflow run engine.
pub mod engine;
/// Role handlers and their execution context.
pub mod handler;
/// Per-agent relevance-ordered job queue.
pub mod job_queue;
/// Periodic performance sampling.
pub mod monitor;
/// Strategy oracle trait and implementations.
pub mod oracle;
/// Agent registry.
pub mod registry;
/// Active and archived run store.
pub mod runs;
/// Built-in templates and template validation.
pub mod templates;
/// Shared orchestration types (roles, jobs, templates, runs).
pub mod types;

pub use collaboration::{CollaborationOutcome, CollaborationRequest, Contribution};
pub use config::{MonitorConfig, OrchestratorConfig};
pub use criteria::{CriteriaTable, Criterion};
pub use engine::WorkflowOrchestrator;
pub use handler::{HandlerTable, StaticHandler, TaskContext, TaskHandler};
pub use job_queue::JobQueue;
pub use monitor::{AgentSample, HealthSample, PerformanceMonitor, WorkflowSample};
pub use oracle::{Decision, DecisionContext, DecisionOracle, FixedOracle, ScriptedOracle, WeightedOracle};
pub use registry::{preferred_role, AgentLease, AgentRegistry};
pub use runs::{RunStore, WorkflowStats};
pub use templates::default_templates;
pub use types::{
    AgentInfo, AgentRole, AgentStats, AgentStatus, DecisionRecord, DurationRange, Job, JobStatus,
    Phase, PhaseOutcome, RunStatus, Strategy, WorkflowOutcome, WorkflowRun, WorkflowTemplate,
};

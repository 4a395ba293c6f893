//! Orchestration engine for the Maestro platform.
//!
//! The composition root: sequences agent lifecycle operations
//! (`start_agent`, `stop_agent`, `create_agent`) across the scheduler,
//! resource pool, and state coordinator, consulting the external
//! collaborators — agent registry, access control, workflow engine, and
//! audit log — at the appropriate steps.
//!
//! # Main types
//!
//! - [`OrchestrationEngine`] — The lifecycle operation surface.
//! - [`AgentRegistry`] / [`MemoryRegistry`] / [`FileRegistry`] — Agent
//!   record storage.
//! - [`WorkflowEngine`] — External execution adapter.
//! - [`StartAgentExecutor`] / [`StopAgentExecutor`] — Scheduler
//!   execution bodies for lifecycle tasks.

/// The engine and its configuration.
pub mod engine;
/// Lifecycle task executors.
pub mod executors;
/// Agent registry trait and implementations.
pub mod registry;
/// External workflow engine adapter.
pub mod workflow;

pub use engine::{AgentSpec, EngineConfig, OrchestrationEngine};
pub use executors::{StartAgentExecutor, StopAgentExecutor, KIND_AGENT_START, KIND_AGENT_STOP};
pub use registry::{AgentRecord, AgentRegistry, AgentStatus, FileRegistry, MemoryRegistry};
pub use workflow::{NoopWorkflowEngine, WorkflowEngine, WorkflowOutcome};

//! Core types and error definitions for the Maestro platform.
//!
//! This crate provides the foundational types shared across all Maestro
//! crates: the unified error enum, the result alias, and the typed event
//! model used for fan-out between subsystems.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`Event`] / [`EventKind`] — Typed events emitted by the scheduler,
//!   resource pool, and orchestration engine.
//! - [`EventBus`] — Broadcast channel carrying [`Event`]s to subscribers.

/// Typed events and the broadcast bus that carries them.
pub mod event;

pub use event::{Event, EventBus, EventKind};

/// Top-level error type for the Maestro platform.
///
/// Each variant corresponds to a failure class a subsystem can produce.
/// Recoverable scheduling conditions (a task whose dependencies are not
/// yet complete) are not errors and never surface through this enum from
/// the scheduler itself; [`MaestroError::DependencyUnsatisfied`] is
/// returned only by engine-level lifecycle checks.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// A resource request that would exceed a configured limit.
    /// Recoverable: the caller may retry after releasing capacity.
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// An unknown task, allocation, transaction, or agent id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A second transaction was begun while one is already active.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// The caller lacks permission for the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A lifecycle precondition on a dependent agent is not met.
    #[error("Dependency unsatisfied: {0}")]
    DependencyUnsatisfied(String),

    /// A task execution body returned an error.
    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    /// A task execution body exceeded its timeout budget.
    #[error("Task timed out after {0}ms")]
    TaskTimeout(u64),

    /// An invalid scheduler operation, e.g. cancelling a terminal task.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// An error from the agent registry.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

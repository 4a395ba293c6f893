//! Cooperative task scheduling for the Maestro platform.
//!
//! Three priority lanes (high/medium/low) feed a single-process
//! scheduler that starts work under a global concurrency bound, gates
//! each task on its dependencies, races every attempt against a
//! per-task timeout, and retries failures up to a bound before marking
//! the task terminally failed. Every status transition publishes exactly
//! one typed event on the shared bus.
//!
//! # Main types
//!
//! - [`Scheduler`] — Submit/tick/cancel surface and the background loop.
//! - [`TaskQueue`] — Lane storage with deterministic ordering.
//! - [`Task`] / [`TaskSpec`] / [`TaskStatus`] — The task model.
//! - [`TaskExecutor`] — Pluggable execution body, keyed by task kind.
//! - [`CancelFlag`] — Cooperative cancellation handle.

/// Execution body trait.
pub mod executor;
/// Lane storage and eligibility scanning.
pub mod queue;
/// Scheduler loop: claim, race, retry, cancel.
pub mod scheduler;
/// Task model and builder.
pub mod task;

pub use executor::TaskExecutor;
pub use queue::TaskQueue;
pub use scheduler::{Scheduler, DEFAULT_MAX_CONCURRENT, DEFAULT_TICK_INTERVAL};
pub use task::{CancelFlag, Priority, QueueStatus, Task, TaskSpec, TaskStatus};

//! Resource admission control for the Maestro platform.
//!
//! Tracks capacity across five resource dimensions (cpu, memory, disk,
//! network in/out), admits or rejects allocation requests against static
//! limits, and periodically re-samples usage through a pluggable probe,
//! raising warning events when a dimension runs hot.
//!
//! # Main types
//!
//! - [`ResourcePool`] — Capacity ledger with wholesale admission control.
//! - [`ResourceSpec`] / [`ResourceLimits`] — Per-dimension quantities.
//! - [`ResourceAllocation`] — A granted request, live until released.
//! - [`ResourceSampler`] — Background usage sampler with warning and
//!   rebalance thresholds.
//! - [`UsageProbe`] — Pluggable usage measurement seam.

/// Capacity ledger and admission control.
pub mod pool;
/// Background usage sampling and rebalance hooks.
pub mod sampler;
/// Resource quantities, dimensions, and allocation records.
pub mod types;

pub use pool::ResourcePool;
pub use sampler::{BookedUsageProbe, NoopRebalance, RebalanceStrategy, ResourceSampler, UsageProbe};
pub use types::{Dimension, ResourceAllocation, ResourceLimits, ResourceReport, ResourceSpec};

//! Transactional state tracking for the Maestro platform.
//!
//! An authoritative versioned map of entity state (agents, tasks,
//! resources) with bounded change history, synchronous observer
//! notification, and all-or-nothing grouped mutation: changes made
//! inside the single active transaction hit the store immediately but
//! stay invisible to history and observers until commit, and a rollback
//! restores every buffered old value in strict reverse order.
//!
//! # Main types
//!
//! - [`StateCoordinator`] — The versioned entity map and transaction
//!   surface.
//! - [`StateChange`] / [`TransactionSummary`] — Recorded mutations.
//! - [`StateObserver`] — Callback seam for registry sync and dashboards.

/// The coordinator: entity map, history, transactions.
pub mod coordinator;
/// Change records, transaction records, observer trait.
pub mod types;

pub use coordinator::{StateCoordinator, DEFAULT_RETENTION};
pub use types::{
    EntityKind, StateChange, StateObserver, TransactionStatus, TransactionSummary,
};

//! Access control and audit logging for the Maestro platform.
//!
//! Implements the security collaborator consumed by the orchestration
//! engine: a role-based access policy answering `check_access` queries,
//! and an append-only audit log recording every privileged operation.
//!
//! # Main types
//!
//! - [`AccessControl`] — The trait the engine consumes.
//! - [`RbacPolicy`] — Role-grant policy, loadable from configuration.
//! - [`AuditLog`] — Append-only JSONL audit writer.

/// Append-only audit logging.
pub mod audit;
/// Role-based access control.
pub mod rbac;

pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use rbac::{AccessControl, Action, AllowAll, RbacPolicy, ResourceType, Role, RoleGrant};

use chrono::{DateTime, Utc};
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The category an entity belongs to in the state map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Agent lifecycle records.
    Agent,
    /// Scheduler task records.
    Task,
    /// Resource allocation records.
    Resource,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Agent => write!(f, "agent"),
            EntityKind::Task => write!(f, "task"),
            EntityKind::Resource => write!(f, "resource"),
        }
    }
}

/// One recorded property mutation on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    /// Unique change id.
    pub id: Uuid,
    /// When the mutation was applied.
    pub timestamp: DateTime<Utc>,
    /// Entity category.
    pub entity: EntityKind,
    /// Entity id within the category.
    pub entity_id: String,
    /// The changed top-level property, or [`StateChange::WHOLE_VALUE`]
    /// when the mutation replaced the entity value as a whole (entity
    /// creation, or a non-object value on either side).
    pub property: String,
    /// Value before the mutation (`Null` when absent).
    pub old_value: serde_json::Value,
    /// Value after the mutation (`Null` when removed).
    pub new_value: serde_json::Value,
    /// Transaction this change was buffered under, if any.
    pub transaction_id: Option<Uuid>,
}

impl StateChange {
    /// Property name used for whole-value mutations. Deliberately not a
    /// plausible object key, so property-level changes never collide
    /// with it.
    pub const WHOLE_VALUE: &'static str = "*";
}

/// Status of a state transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Open and buffering changes.
    Pending,
    /// Flushed to history and observers.
    Committed,
    /// Reversed; history and observers never saw it.
    RolledBack,
}

/// Terminal record of a transaction, kept for introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Transaction id.
    pub id: Uuid,
    /// Caller-supplied description.
    pub description: String,
    /// Terminal status.
    pub status: TransactionStatus,
    /// Number of buffered changes.
    pub change_count: usize,
    /// When the transaction was begun.
    pub started_at: DateTime<Utc>,
    /// When it was committed or rolled back.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Callback surface for state consumers (registry sync, dashboards).
///
/// Observer failures are logged and swallowed by the coordinator; they
/// never corrupt state or propagate to the mutating caller.
pub trait StateObserver: Send + Sync {
    /// Called once per recorded [`StateChange`], in record order.
    fn on_state_changed(&self, change: &StateChange) -> MaestroResult<()>;

    /// Called once per committed transaction, after its changes have
    /// been delivered. Rolled-back transactions are never reported.
    fn on_transaction_completed(&self, summary: &TransactionSummary) -> MaestroResult<()> {
        let _ = summary;
        Ok(())
    }
}

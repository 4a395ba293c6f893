use crate::types::{
    EntityKind, StateChange, StateObserver, TransactionStatus, TransactionSummary,
};
use chrono::Utc;
use maestro_core::{MaestroError, MaestroResult};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on retained history entries.
pub const DEFAULT_RETENTION: usize = 1000;

struct EntityRecord {
    value: Value,
    version: u64,
}

struct ActiveTransaction {
    id: Uuid,
    description: String,
    started_at: chrono::DateTime<Utc>,
    changes: Vec<StateChange>,
}

struct StateMap {
    entities: HashMap<(EntityKind, String), EntityRecord>,
    history: VecDeque<StateChange>,
    active_tx: Option<ActiveTransaction>,
    finished_tx: HashMap<Uuid, TransactionSummary>,
}

/// Authoritative versioned map of entity state.
///
/// Mutations flow through [`set_state`], which records a structural diff
/// per changed top-level property, appends it to a bounded history, and
/// notifies observers. Grouped mutations run inside a single active
/// transaction: changes hit the store immediately but stay invisible to
/// history and observers until [`commit_transaction`]; a rollback
/// restores every buffered `old_value` in strict reverse order.
///
/// Only one transaction may be active process-wide at a time — a
/// deliberate single-writer constraint, not an oversight.
///
/// [`set_state`]: StateCoordinator::set_state
/// [`commit_transaction`]: StateCoordinator::commit_transaction
pub struct StateCoordinator {
    state: RwLock<StateMap>,
    observers: parking_lot::RwLock<Vec<Arc<dyn StateObserver>>>,
    retention: usize,
}

impl StateCoordinator {
    /// Creates a coordinator with [`DEFAULT_RETENTION`].
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Creates a coordinator with an explicit history bound.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: RwLock::new(StateMap {
                entities: HashMap::new(),
                history: VecDeque::new(),
                active_tx: None,
                finished_tx: HashMap::new(),
            }),
            observers: parking_lot::RwLock::new(Vec::new()),
            retention: retention.max(1),
        }
    }

    /// Registers an observer for subsequent changes.
    pub fn subscribe(&self, observer: Arc<dyn StateObserver>) {
        self.observers.write().push(observer);
    }

    /// Applies `value` to `(kind, id)`, recording a diff against the
    /// prior value.
    ///
    /// Outside a transaction the recorded changes go to history and
    /// observers immediately; inside one they are buffered until commit.
    /// A no-op write (structurally equal value) records nothing and does
    /// not bump the entity version.
    pub async fn set_state(
        &self,
        kind: EntityKind,
        id: impl Into<String>,
        value: Value,
    ) -> MaestroResult<()> {
        let id = id.into();
        let notify = {
            let mut state = self.state.write().await;
            let key = (kind, id.clone());
            let old = state
                .entities
                .get(&key)
                .map(|r| r.value.clone())
                .unwrap_or(Value::Null);

            let tx_id = state.active_tx.as_ref().map(|tx| tx.id);
            let changes = diff_changes(kind, &id, &old, &value, tx_id);
            if changes.is_empty() {
                debug!(entity = %kind, entity_id = %id, "no-op state write");
                return Ok(());
            }

            let record = state.entities.entry(key).or_insert(EntityRecord {
                value: Value::Null,
                version: 0,
            });
            record.value = value;
            record.version += 1;

            if let Some(tx) = state.active_tx.as_mut() {
                tx.changes.extend(changes);
                None
            } else {
                for change in &changes {
                    push_history(&mut state.history, self.retention, change.clone());
                }
                Some(changes)
            }
        };

        if let Some(changes) = notify {
            for change in &changes {
                self.notify_change(change);
            }
        }
        Ok(())
    }

    /// Current value of an entity, if present.
    pub async fn get_state(&self, kind: EntityKind, id: &str) -> Option<Value> {
        self.state
            .read()
            .await
            .entities
            .get(&(kind, id.to_string()))
            .map(|r| r.value.clone())
    }

    /// Monotonic version counter of an entity, if present.
    pub async fn version(&self, kind: EntityKind, id: &str) -> Option<u64> {
        self.state
            .read()
            .await
            .entities
            .get(&(kind, id.to_string()))
            .map(|r| r.version)
    }

    /// Opens a transaction. Fails with [`MaestroError::TransactionConflict`]
    /// while another one is active.
    pub async fn begin_transaction(&self, description: impl Into<String>) -> MaestroResult<Uuid> {
        let mut state = self.state.write().await;
        if let Some(active) = &state.active_tx {
            return Err(MaestroError::TransactionConflict(format!(
                "transaction {} ({}) is already active",
                active.id, active.description
            )));
        }
        let tx = ActiveTransaction {
            id: Uuid::new_v4(),
            description: description.into(),
            started_at: Utc::now(),
            changes: Vec::new(),
        };
        let id = tx.id;
        info!(transaction_id = %id, description = %tx.description, "transaction begun");
        state.active_tx = Some(tx);
        Ok(id)
    }

    /// Commits the active transaction: its buffered changes are flushed
    /// to history and observers in original order.
    pub async fn commit_transaction(&self, id: Uuid) -> MaestroResult<()> {
        let (changes, summary) = {
            let mut state = self.state.write().await;
            let tx = take_active(&mut state, id)?;

            for change in &tx.changes {
                push_history(&mut state.history, self.retention, change.clone());
            }
            let summary = TransactionSummary {
                id: tx.id,
                description: tx.description,
                status: TransactionStatus::Committed,
                change_count: tx.changes.len(),
                started_at: tx.started_at,
                finished_at: Some(Utc::now()),
            };
            state.finished_tx.insert(id, summary.clone());
            (tx.changes, summary)
        };

        info!(
            transaction_id = %id,
            changes = changes.len(),
            "transaction committed"
        );
        for change in &changes {
            self.notify_change(change);
        }
        self.notify_transaction(&summary);
        Ok(())
    }

    /// Rolls the active transaction back: every buffered `old_value` is
    /// restored in strict reverse order. History and observers never
    /// learn the transaction existed.
    pub async fn rollback_transaction(&self, id: Uuid) -> MaestroResult<()> {
        let mut state = self.state.write().await;
        let tx = take_active(&mut state, id)?;

        for change in tx.changes.iter().rev() {
            restore_change(&mut state.entities, change);
        }
        let summary = TransactionSummary {
            id: tx.id,
            description: tx.description,
            status: TransactionStatus::RolledBack,
            change_count: tx.changes.len(),
            started_at: tx.started_at,
            finished_at: Some(Utc::now()),
        };
        state.finished_tx.insert(id, summary);

        info!(transaction_id = %id, changes = tx.changes.len(), "transaction rolled back");
        Ok(())
    }

    /// Terminal record of a finished transaction.
    pub async fn transaction(&self, id: Uuid) -> Option<TransactionSummary> {
        self.state.read().await.finished_tx.get(&id).cloned()
    }

    /// Tail of recorded changes for one entity, oldest first, at most
    /// `limit` entries. Bounded globally by the retention cap.
    pub async fn entity_history(
        &self,
        kind: EntityKind,
        id: &str,
        limit: usize,
    ) -> Vec<StateChange> {
        let state = self.state.read().await;
        let matching: Vec<StateChange> = state
            .history
            .iter()
            .filter(|c| c.entity == kind && c.entity_id == id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// Total retained history entries across all entities.
    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    fn notify_change(&self, change: &StateChange) {
        for observer in self.observers.read().iter() {
            if let Err(e) = observer.on_state_changed(change) {
                warn!(change_id = %change.id, error = %e, "state observer failed");
            }
        }
    }

    fn notify_transaction(&self, summary: &TransactionSummary) {
        for observer in self.observers.read().iter() {
            if let Err(e) = observer.on_transaction_completed(summary) {
                warn!(transaction_id = %summary.id, error = %e, "transaction observer failed");
            }
        }
    }
}

impl Default for StateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn take_active(state: &mut StateMap, id: Uuid) -> MaestroResult<ActiveTransaction> {
    match state.active_tx.take() {
        Some(active) if active.id == id => Ok(active),
        other => {
            state.active_tx = other;
            Err(MaestroError::NotFound(format!("active transaction {id}")))
        }
    }
}

fn push_history(history: &mut VecDeque<StateChange>, retention: usize, change: StateChange) {
    if history.len() >= retention {
        history.pop_front();
    }
    history.push_back(change);
}

/// Structural diff between two entity values.
///
/// When both sides are JSON objects the diff is per top-level property
/// (union of keys, sorted for determinism); otherwise a single
/// whole-value change is produced. Equal values diff to nothing.
fn diff_changes(
    kind: EntityKind,
    entity_id: &str,
    old: &Value,
    new: &Value,
    tx_id: Option<Uuid>,
) -> Vec<StateChange> {
    if old == new {
        return Vec::new();
    }

    let make = |property: String, old_value: Value, new_value: Value| StateChange {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        entity: kind,
        entity_id: entity_id.to_string(),
        property,
        old_value,
        new_value,
        transaction_id: tx_id,
    };

    match (old.as_object(), new.as_object()) {
        (Some(old_map), Some(new_map)) => {
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();

            keys.into_iter()
                .filter_map(|key| {
                    let old_value = old_map.get(key).cloned().unwrap_or(Value::Null);
                    let new_value = new_map.get(key).cloned().unwrap_or(Value::Null);
                    (old_value != new_value)
                        .then(|| make(key.clone(), old_value, new_value))
                })
                .collect()
        }
        _ => vec![make(
            StateChange::WHOLE_VALUE.to_string(),
            old.clone(),
            new.clone(),
        )],
    }
}

/// Restores one buffered change's `old_value` into the store.
fn restore_change(entities: &mut HashMap<(EntityKind, String), EntityRecord>, change: &StateChange) {
    let key = (change.entity, change.entity_id.clone());

    if change.property == StateChange::WHOLE_VALUE {
        if change.old_value.is_null() {
            entities.remove(&key);
        } else if let Some(record) = entities.get_mut(&key) {
            record.value = change.old_value.clone();
            record.version += 1;
        }
        return;
    }

    if let Some(record) = entities.get_mut(&key) {
        if let Some(map) = record.value.as_object_mut() {
            if change.old_value.is_null() {
                map.remove(&change.property);
            } else {
                map.insert(change.property.clone(), change.old_value.clone());
            }
            record.version += 1;
        }
    }
}

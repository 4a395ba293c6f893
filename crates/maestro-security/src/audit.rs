use crate::rbac::{Action, ResourceType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One recorded privileged operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the operation happened.
    pub timestamp: DateTime<Utc>,
    /// The acting user.
    pub user_id: String,
    /// The attempted action.
    pub action: Action,
    /// Target resource id.
    pub resource_id: String,
    /// Target resource type.
    pub resource_type: ResourceType,
    /// Operation-specific context.
    pub details: serde_json::Value,
    /// How the operation ended.
    pub outcome: AuditOutcome,
}

/// Terminal outcome of an audited operation.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The operation succeeded.
    Success,
    /// The operation was denied by access control.
    Denied,
    /// The operation failed for another reason.
    Error,
}

/// Append-only audit log.
///
/// Entries are handed to a background task over an unbounded channel
/// and appended to `audit.jsonl` in the log directory, one JSON object
/// per line. Logging is fire-and-forget: a write failure is traced and
/// dropped, never surfaced to the operation being audited.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditLog {
    /// Creates the log and spawns its background writer.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(error = %e, "audit log directory could not be created");
            }
            let log_file = log_dir.join("audit.jsonl");

            while let Some(entry) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&entry) else {
                    continue;
                };
                let result = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await?;
                    file.write_all(format!("{line}\n").as_bytes()).await
                }
                .await;
                if let Err(e) = result {
                    warn!(error = %e, "audit entry could not be written");
                }
            }
        });

        Self { tx }
    }

    /// Records an entry.
    pub fn log(&self, entry: AuditEntry) {
        info!(
            user_id = %entry.user_id,
            action = %entry.action,
            resource_id = %entry.resource_id,
            outcome = ?entry.outcome,
            "audit"
        );
        let _ = self.tx.send(entry);
    }

    /// Builds and records an entry stamped with the current time.
    pub fn log_action(
        &self,
        user_id: impl Into<String>,
        action: Action,
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            action,
            resource_id: resource_id.into(),
            resource_type,
            details,
            outcome,
        });
    }
}

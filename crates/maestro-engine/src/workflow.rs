use crate::registry::AgentRecord;
use async_trait::async_trait;
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};

/// Result of dispatching an agent to the external workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Whether the engine accepted and ran the workflow.
    pub success: bool,
    /// Engine-specific response data.
    pub data: serde_json::Value,
    /// Execution handle on the external engine, when one was assigned.
    pub execution_id: Option<String>,
}

/// External workflow engine adapter.
///
/// Invoked as the execution body of an `agent.start` task; the call is
/// opaque to the core, and its failures and timeouts are handled
/// uniformly by the scheduler's retry machinery.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Translates the agent's definition and executes it remotely.
    async fn translate_and_execute(&self, agent: &AgentRecord) -> MaestroResult<WorkflowOutcome>;
}

/// Workflow engine that accepts everything without doing anything.
///
/// Used by local development and tests when no external engine is wired.
pub struct NoopWorkflowEngine;

#[async_trait]
impl WorkflowEngine for NoopWorkflowEngine {
    async fn translate_and_execute(&self, agent: &AgentRecord) -> MaestroResult<WorkflowOutcome> {
        Ok(WorkflowOutcome {
            success: true,
            data: serde_json::json!({ "agent": agent.id }),
            execution_id: None,
        })
    }
}

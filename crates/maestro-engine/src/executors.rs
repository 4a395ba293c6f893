use crate::registry::{AgentRegistry, AgentStatus};
use crate::workflow::WorkflowEngine;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use maestro_scheduler::{CancelFlag, Task, TaskExecutor};
use std::sync::Arc;
use tracing::info;

/// Task kind dispatched when an agent is started.
pub const KIND_AGENT_START: &str = "agent.start";
/// Task kind dispatched when an agent is stopped.
pub const KIND_AGENT_STOP: &str = "agent.stop";

/// Execution body for `agent.start` tasks.
///
/// Looks the agent up (the task's `owner_id` is the agent id), hands it
/// to the workflow engine, and marks it `Running` on success. Failures
/// surface as errors so the scheduler's retry machinery takes over;
/// terminal failure is reflected into the registry by the engine's
/// lifecycle monitor, not here.
pub struct StartAgentExecutor {
    registry: Arc<dyn AgentRegistry>,
    workflow: Arc<dyn WorkflowEngine>,
}

impl StartAgentExecutor {
    /// Creates the executor over the shared collaborators.
    pub fn new(registry: Arc<dyn AgentRegistry>, workflow: Arc<dyn WorkflowEngine>) -> Self {
        Self { registry, workflow }
    }
}

#[async_trait]
impl TaskExecutor for StartAgentExecutor {
    async fn execute(&self, task: &Task, cancel: &CancelFlag) -> MaestroResult<serde_json::Value> {
        let agent_id = task.owner_id.as_str();
        let agent = self
            .registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("agent {agent_id}")))?;

        if cancel.is_cancelled() {
            return Err(MaestroError::TaskExecution(format!(
                "start of agent {agent_id} cancelled before dispatch"
            )));
        }

        let outcome = self.workflow.translate_and_execute(&agent).await?;
        if !outcome.success {
            return Err(MaestroError::TaskExecution(format!(
                "workflow engine rejected agent {agent_id}: {}",
                outcome.data
            )));
        }

        self.registry
            .update_agent_status(agent_id, AgentStatus::Running)
            .await?;
        info!(agent_id = %agent_id, execution_id = ?outcome.execution_id, "agent running");

        Ok(serde_json::json!({
            "execution_id": outcome.execution_id,
            "data": outcome.data,
        }))
    }
}

/// Execution body for `agent.stop` tasks: marks the agent `Stopped`.
///
/// The external workflow execution, if any, is left to wind down on its
/// own; the adapter interface has no teardown call.
pub struct StopAgentExecutor {
    registry: Arc<dyn AgentRegistry>,
}

impl StopAgentExecutor {
    /// Creates the executor over the shared registry.
    pub fn new(registry: Arc<dyn AgentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TaskExecutor for StopAgentExecutor {
    async fn execute(&self, task: &Task, _cancel: &CancelFlag) -> MaestroResult<serde_json::Value> {
        let agent_id = task.owner_id.as_str();
        self.registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("agent {agent_id}")))?;

        self.registry
            .update_agent_status(agent_id, AgentStatus::Stopped)
            .await?;
        info!(agent_id = %agent_id, "agent stopped");
        Ok(serde_json::json!({ "agent": agent_id }))
    }
}

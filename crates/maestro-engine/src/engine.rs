use crate::executors::{StartAgentExecutor, StopAgentExecutor, KIND_AGENT_START, KIND_AGENT_STOP};
use crate::registry::{AgentRecord, AgentRegistry, AgentStatus};
use crate::workflow::WorkflowEngine;
use maestro_core::{Event, EventBus, EventKind, MaestroError, MaestroResult};
use maestro_resources::{ResourceLimits, ResourcePool, ResourceReport, ResourceSpec};
use maestro_scheduler::{Priority, QueueStatus, Scheduler, TaskSpec};
use maestro_security::{AccessControl, Action, AuditLog, AuditOutcome, ResourceType};
use maestro_state::{EntityKind, StateChange, StateCoordinator};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Tuning knobs for the engine's owned subsystems.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Static capacity limits for the resource pool.
    pub limits: ResourceLimits,
    /// Global bound on concurrently executing tasks.
    pub max_concurrent: usize,
    /// State history retention cap.
    pub history_retention: usize,
    /// Retry budget for lifecycle tasks.
    pub lifecycle_max_retries: u32,
    /// Per-attempt timeout for lifecycle tasks.
    pub lifecycle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            max_concurrent: maestro_scheduler::DEFAULT_MAX_CONCURRENT,
            history_retention: maestro_state::DEFAULT_RETENTION,
            lifecycle_max_retries: 2,
            lifecycle_timeout: Duration::from_secs(60),
        }
    }
}

/// Caller-facing description of an agent to create.
#[derive(Debug, Clone, Default)]
pub struct AgentSpec {
    /// Display name, unique per owner.
    pub name: String,
    /// Optional source template.
    pub template: Option<String>,
    /// Lookup tags.
    pub tags: Vec<String>,
    /// Ids of agents that must be running before this one starts.
    pub dependencies: Vec<String>,
    /// Resource footprint requested on start.
    pub resources: ResourceSpec,
}

/// Composition root sequencing agent lifecycle operations across the
/// scheduler, resource pool, state coordinator, and the external
/// collaborators (registry, access control, workflow engine, audit).
///
/// The engine owns the core subsystems and exposes them read-only;
/// external collaborators are injected as trait objects. Every
/// high-level operation fails fast on the first failing step and
/// surfaces that step's error unchanged; a resource allocation admitted
/// before a later step fails is explicitly released, never leaked.
pub struct OrchestrationEngine {
    config: EngineConfig,
    registry: Arc<dyn AgentRegistry>,
    security: Arc<dyn AccessControl>,
    audit: Arc<AuditLog>,
    pool: Arc<ResourcePool>,
    scheduler: Scheduler,
    state: Arc<StateCoordinator>,
    bus: EventBus,
}

impl OrchestrationEngine {
    /// Wires the engine: builds the owned subsystems and registers the
    /// lifecycle task executors.
    pub fn new(
        config: EngineConfig,
        registry: Arc<dyn AgentRegistry>,
        security: Arc<dyn AccessControl>,
        audit: Arc<AuditLog>,
        workflow: Arc<dyn WorkflowEngine>,
        bus: EventBus,
    ) -> Arc<Self> {
        let pool = Arc::new(ResourcePool::new(config.limits));
        let scheduler = Scheduler::new(config.max_concurrent, bus.clone());
        let state = Arc::new(StateCoordinator::with_retention(config.history_retention));

        scheduler.register_executor(
            KIND_AGENT_START,
            Arc::new(StartAgentExecutor::new(registry.clone(), workflow)),
        );
        scheduler.register_executor(
            KIND_AGENT_STOP,
            Arc::new(StopAgentExecutor::new(registry.clone())),
        );

        Arc::new(Self {
            config,
            registry,
            security,
            audit,
            pool,
            scheduler,
            state,
            bus,
        })
    }

    /// Starts an agent on behalf of `user_id`.
    ///
    /// Sequence: registry lookup → permission check → every declared
    /// dependency agent running → resource admission → lifecycle task
    /// submission → transactional state record → audit. The first
    /// failing step aborts the rest and its error is returned; any
    /// allocation already admitted is released on the way out.
    ///
    /// Returns the id of the submitted `agent.start` task. The start is
    /// asynchronous from here: success or terminal failure is observable
    /// through the event stream or by polling the agent's status.
    pub async fn start_agent(&self, agent_id: &str, user_id: &str) -> MaestroResult<Uuid> {
        info!(agent_id = %agent_id, user_id = %user_id, "start agent requested");

        let agent = self.lookup(agent_id).await?;
        self.authorize(user_id, &agent, Action::Start).await?;

        if !matches!(agent.status, AgentStatus::Stopped | AgentStatus::Error) {
            return Err(MaestroError::Registry(format!(
                "agent {agent_id} is {} and cannot be started",
                agent.status
            )));
        }

        for dep_id in &agent.dependencies {
            let dep = self.registry.get_agent(dep_id).await?.ok_or_else(|| {
                MaestroError::DependencyUnsatisfied(format!(
                    "dependency {dep_id} of agent {agent_id} does not exist"
                ))
            })?;
            if dep.status != AgentStatus::Running {
                return Err(MaestroError::DependencyUnsatisfied(format!(
                    "dependency {dep_id} of agent {agent_id} is {}, expected running",
                    dep.status
                )));
            }
        }

        let allocation = match self.pool.allocate(agent_id, agent.resources) {
            Ok(allocation) => allocation,
            Err(e) => {
                self.audit.log_action(
                    user_id,
                    Action::Start,
                    agent_id,
                    ResourceType::Agent,
                    json!({ "error": e.to_string() }),
                    AuditOutcome::Error,
                );
                return Err(e);
            }
        };

        // Past admission: every further failure must give the
        // allocation back instead of leaking it.
        if let Err(e) = self
            .registry
            .update_agent_status(agent_id, AgentStatus::Starting)
            .await
        {
            let _ = self.pool.release(allocation.id);
            return Err(e);
        }

        let task_id = self
            .scheduler
            .submit(
                TaskSpec::new(agent_id, KIND_AGENT_START)
                    .priority(Priority::High)
                    .max_retries(self.config.lifecycle_max_retries)
                    .timeout(self.config.lifecycle_timeout),
            )
            .await;

        if let Err(e) = self.record_start(&agent, task_id, &allocation.id).await {
            let _ = self.scheduler.cancel(task_id).await;
            let _ = self.pool.release(allocation.id);
            let _ = self
                .registry
                .update_agent_status(agent_id, agent.status)
                .await;
            return Err(e);
        }

        self.audit.log_action(
            user_id,
            Action::Start,
            agent_id,
            ResourceType::Agent,
            json!({ "task_id": task_id, "allocation_id": allocation.id }),
            AuditOutcome::Success,
        );
        self.bus.emit(
            EventKind::AgentStarted,
            json!({ "agent_id": agent_id, "task_id": task_id }),
        );
        Ok(task_id)
    }

    /// Stops a running agent on behalf of `user_id`.
    ///
    /// Refused while another *running* agent declares this one as a
    /// dependency. Releases every live allocation owned by the agent.
    pub async fn stop_agent(&self, agent_id: &str, user_id: &str) -> MaestroResult<Uuid> {
        info!(agent_id = %agent_id, user_id = %user_id, "stop agent requested");

        let agent = self.lookup(agent_id).await?;
        self.authorize(user_id, &agent, Action::Stop).await?;

        if agent.status != AgentStatus::Running {
            return Err(MaestroError::Registry(format!(
                "agent {agent_id} is {} and cannot be stopped",
                agent.status
            )));
        }

        for other in self.registry.list_agents().await? {
            if other.id != agent.id
                && other.status == AgentStatus::Running
                && other.dependencies.iter().any(|d| d == agent_id)
            {
                return Err(MaestroError::DependencyUnsatisfied(format!(
                    "agent {agent_id} is required by running agent {}",
                    other.id
                )));
            }
        }

        self.registry
            .update_agent_status(agent_id, AgentStatus::Stopping)
            .await?;

        let task_id = self
            .scheduler
            .submit(
                TaskSpec::new(agent_id, KIND_AGENT_STOP)
                    .priority(Priority::High)
                    .timeout(self.config.lifecycle_timeout),
            )
            .await;

        let released = self.pool.release_owned_by(agent_id);

        if let Err(e) = self
            .merge_entity(EntityKind::Agent, agent_id, json!({ "status": "stopping" }))
            .await
        {
            warn!(agent_id = %agent_id, error = %e, "stop recorded without state entry");
        }

        self.audit.log_action(
            user_id,
            Action::Stop,
            agent_id,
            ResourceType::Agent,
            json!({ "task_id": task_id, "released_allocations": released }),
            AuditOutcome::Success,
        );
        self.bus.emit(
            EventKind::AgentStopped,
            json!({ "agent_id": agent_id, "task_id": task_id }),
        );
        Ok(task_id)
    }

    /// Creates a new agent record owned by `user_id`.
    pub async fn create_agent(&self, spec: AgentSpec, user_id: &str) -> MaestroResult<AgentRecord> {
        if !self
            .security
            .check_access(user_id, "new", ResourceType::Agent, Action::Create)
            .await
        {
            self.audit.log_action(
                user_id,
                Action::Create,
                "new",
                ResourceType::Agent,
                json!({ "name": spec.name }),
                AuditOutcome::Denied,
            );
            return Err(MaestroError::PermissionDenied(format!(
                "user {user_id} may not create agents"
            )));
        }

        let existing = self.registry.find_by_owner(user_id).await?;
        if existing.iter().any(|r| r.name == spec.name) {
            return Err(MaestroError::Registry(format!(
                "agent name '{}' is already in use by {user_id}",
                spec.name
            )));
        }

        let mut record = AgentRecord::new(spec.name, user_id)
            .with_dependencies(spec.dependencies)
            .with_resources(spec.resources)
            .with_tags(spec.tags);
        if let Some(template) = spec.template {
            record = record.with_template(template);
        }
        self.registry.insert_agent(record.clone()).await?;

        self.state
            .set_state(
                EntityKind::Agent,
                record.id.clone(),
                json!({
                    "status": record.status.to_string(),
                    "owner_id": record.owner_id,
                    "name": record.name,
                }),
            )
            .await?;

        self.audit.log_action(
            user_id,
            Action::Create,
            record.id.clone(),
            ResourceType::Agent,
            json!({ "name": record.name }),
            AuditOutcome::Success,
        );
        self.bus.emit(
            EventKind::AgentCreated,
            json!({ "agent_id": record.id, "owner_id": record.owner_id }),
        );

        info!(agent_id = %record.id, owner_id = %record.owner_id, "agent created");
        Ok(record)
    }

    /// Spawns the lifecycle monitor: a bus subscriber reflecting
    /// terminal task outcomes back into the registry and state map.
    ///
    /// Returns the [`JoinHandle`] so the caller can abort it on shutdown.
    pub fn start_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => engine.reflect_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "lifecycle monitor lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Per-lane queue counts plus the live execution counter.
    pub async fn queue_status(&self) -> QueueStatus {
        self.scheduler.queue_status().await
    }

    /// Usage, limits, and live allocations.
    pub fn resource_report(&self) -> ResourceReport {
        self.pool.snapshot()
    }

    /// Recorded state changes for one entity, oldest first.
    pub async fn entity_history(
        &self,
        kind: EntityKind,
        id: &str,
        limit: usize,
    ) -> Vec<StateChange> {
        self.state.entity_history(kind, id, limit).await
    }

    /// Agent record by id.
    pub async fn agent(&self, id: &str) -> MaestroResult<Option<AgentRecord>> {
        self.registry.get_agent(id).await
    }

    /// Subscribes to the engine's typed event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// The owned scheduler, for driving ticks and inspecting tasks.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The owned resource pool.
    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// The owned state coordinator.
    pub fn state(&self) -> &Arc<StateCoordinator> {
        &self.state
    }

    async fn lookup(&self, agent_id: &str) -> MaestroResult<AgentRecord> {
        self.registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| MaestroError::NotFound(format!("agent {agent_id}")))
    }

    /// Owner-or-role authorization; denial is audited here so callers
    /// only handle the error.
    async fn authorize(
        &self,
        user_id: &str,
        agent: &AgentRecord,
        action: Action,
    ) -> MaestroResult<()> {
        let allowed = agent.owner_id == user_id
            || self
                .security
                .check_access(user_id, &agent.id, ResourceType::Agent, action)
                .await;
        if allowed {
            return Ok(());
        }
        self.audit.log_action(
            user_id,
            action,
            agent.id.clone(),
            ResourceType::Agent,
            Value::Null,
            AuditOutcome::Denied,
        );
        Err(MaestroError::PermissionDenied(format!(
            "user {user_id} may not {action} agent {}",
            agent.id
        )))
    }

    /// Transactionally records the start: the agent's lifecycle entry
    /// and the allocation entry land together or not at all.
    async fn record_start(
        &self,
        agent: &AgentRecord,
        task_id: Uuid,
        allocation_id: &Uuid,
    ) -> MaestroResult<()> {
        let tx = self
            .state
            .begin_transaction(format!("start agent {}", agent.id))
            .await?;

        let result = async {
            self.state
                .set_state(
                    EntityKind::Agent,
                    agent.id.clone(),
                    json!({
                        "status": AgentStatus::Starting.to_string(),
                        "owner_id": agent.owner_id,
                        "name": agent.name,
                        "task_id": task_id,
                        "allocation_id": allocation_id,
                    }),
                )
                .await?;
            self.state
                .set_state(
                    EntityKind::Resource,
                    allocation_id.to_string(),
                    json!({
                        "owner_id": agent.id,
                        "requested": agent.resources,
                        "active": true,
                    }),
                )
                .await
        }
        .await;

        match result {
            Ok(()) => self.state.commit_transaction(tx).await,
            Err(e) => {
                let _ = self.state.rollback_transaction(tx).await;
                Err(e)
            }
        }
    }

    /// Read-modify-write of one entity's object value.
    async fn merge_entity(
        &self,
        kind: EntityKind,
        id: &str,
        updates: Value,
    ) -> MaestroResult<()> {
        let mut value = self
            .state
            .get_state(kind, id)
            .await
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        if let (Some(target), Some(source)) = (value.as_object_mut(), updates.as_object()) {
            for (key, update) in source {
                target.insert(key.clone(), update.clone());
            }
        }
        self.state.set_state(kind, id, value).await
    }

    /// Reflects terminal lifecycle task outcomes into the registry and
    /// state map. Registry failures are logged, never propagated — the
    /// monitor must outlive individual bad events.
    async fn reflect_event(&self, event: Event) {
        let task_kind = event
            .payload
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(agent_id) = event
            .payload
            .get("owner_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };

        match (event.kind, task_kind.as_str()) {
            (EventKind::TaskCompleted, KIND_AGENT_START) => {
                if let Err(e) = self
                    .merge_entity(
                        EntityKind::Agent,
                        &agent_id,
                        json!({ "status": AgentStatus::Running.to_string() }),
                    )
                    .await
                {
                    warn!(agent_id = %agent_id, error = %e, "state not updated after start");
                }
            }
            (EventKind::TaskCompleted, KIND_AGENT_STOP) => {
                if let Err(e) = self
                    .merge_entity(
                        EntityKind::Agent,
                        &agent_id,
                        json!({ "status": AgentStatus::Stopped.to_string() }),
                    )
                    .await
                {
                    warn!(agent_id = %agent_id, error = %e, "state not updated after stop");
                }
            }
            (EventKind::TaskFailed, KIND_AGENT_START | KIND_AGENT_STOP) => {
                let error = event
                    .payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                warn!(agent_id = %agent_id, error = %error, "lifecycle task failed terminally");
                if task_kind == KIND_AGENT_START {
                    // The start admitted an allocation the agent will
                    // never use; give it back so a later retry starts
                    // from a clean ledger.
                    self.pool.release_owned_by(&agent_id);
                }
                if let Err(e) = self
                    .registry
                    .update_agent_status(&agent_id, AgentStatus::Error)
                    .await
                {
                    warn!(agent_id = %agent_id, error = %e, "registry not updated after failure");
                }
                if let Err(e) = self
                    .merge_entity(
                        EntityKind::Agent,
                        &agent_id,
                        json!({
                            "status": AgentStatus::Error.to_string(),
                            "last_error": error,
                        }),
                    )
                    .await
                {
                    warn!(agent_id = %agent_id, error = %e, "state not updated after failure");
                }
            }
            _ => {}
        }
    }
}

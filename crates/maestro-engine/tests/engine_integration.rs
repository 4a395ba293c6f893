#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end engine tests.
//!
//! Exercises the full lifecycle sequencing — permission check, dependency
//! verification, resource admission, task scheduling, transactional state
//! recording — using the in-memory registry, a mock workflow engine, and
//! real scheduler/pool/state subsystems.

use async_trait::async_trait;
use maestro_core::{EventBus, EventKind, MaestroError, MaestroResult};
use maestro_engine::{
    AgentRecord, AgentRegistry, AgentSpec, AgentStatus, EngineConfig, MemoryRegistry,
    NoopWorkflowEngine, OrchestrationEngine, WorkflowEngine, WorkflowOutcome,
};
use maestro_resources::{ResourceLimits, ResourceSpec};
use maestro_scheduler::TaskStatus;
use maestro_security::{AccessControl, Action, AllowAll, AuditLog, RbacPolicy, ResourceType};
use maestro_state::EntityKind;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Workflow engine whose dispatch always fails.
struct FailingWorkflow;

#[async_trait]
impl WorkflowEngine for FailingWorkflow {
    async fn translate_and_execute(&self, _agent: &AgentRecord) -> MaestroResult<WorkflowOutcome> {
        Err(MaestroError::TaskExecution("engine unreachable".into()))
    }
}

/// Registry wrapper whose status updates always fail, for exercising the
/// release-on-failure path after admission.
struct BrokenStatusRegistry {
    inner: MemoryRegistry,
}

#[async_trait]
impl AgentRegistry for BrokenStatusRegistry {
    async fn get_agent(&self, id: &str) -> MaestroResult<Option<AgentRecord>> {
        self.inner.get_agent(id).await
    }
    async fn insert_agent(&self, record: AgentRecord) -> MaestroResult<()> {
        self.inner.insert_agent(record).await
    }
    async fn update_agent_status(&self, _id: &str, _status: AgentStatus) -> MaestroResult<()> {
        Err(MaestroError::Registry("registry store is read-only".into()))
    }
    async fn remove_agent(&self, id: &str) -> MaestroResult<()> {
        self.inner.remove_agent(id).await
    }
    async fn list_agents(&self) -> MaestroResult<Vec<AgentRecord>> {
        self.inner.list_agents().await
    }
    async fn find_by_owner(&self, owner_id: &str) -> MaestroResult<Vec<AgentRecord>> {
        self.inner.find_by_owner(owner_id).await
    }
    async fn find_by_tag(&self, tag: &str) -> MaestroResult<Vec<AgentRecord>> {
        self.inner.find_by_tag(tag).await
    }
    async fn find_by_template(&self, template: &str) -> MaestroResult<Vec<AgentRecord>> {
        self.inner.find_by_template(template).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: Arc<OrchestrationEngine>,
    _audit_dir: tempfile::TempDir,
}

fn cpu_limits(cpu: u64) -> ResourceLimits {
    ResourceLimits(ResourceSpec {
        cpu,
        ..Default::default()
    })
}

fn cpu_spec(cpu: u64) -> ResourceSpec {
    ResourceSpec {
        cpu,
        ..Default::default()
    }
}

fn build_engine(
    config: EngineConfig,
    registry: Arc<dyn AgentRegistry>,
    security: Arc<dyn AccessControl>,
    workflow: Arc<dyn WorkflowEngine>,
) -> Harness {
    let audit_dir = tempfile::tempdir().expect("tempdir");
    let audit = Arc::new(AuditLog::new(audit_dir.path().to_path_buf()));
    let bus = EventBus::new();
    let engine = OrchestrationEngine::new(config, registry, security, audit, workflow, bus);
    engine.start_monitor();
    Harness {
        engine,
        _audit_dir: audit_dir,
    }
}

fn default_harness() -> Harness {
    build_engine(
        EngineConfig {
            limits: cpu_limits(100),
            lifecycle_max_retries: 0,
            ..Default::default()
        },
        Arc::new(MemoryRegistry::new()),
        Arc::new(AllowAll),
        Arc::new(NoopWorkflowEngine),
    )
}

/// Ticks the scheduler until the task is terminal.
async fn drive_task(engine: &Arc<OrchestrationEngine>, task_id: Uuid) -> TaskStatus {
    for _ in 0..500 {
        engine.scheduler().tick().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(task) = engine.scheduler().task(task_id).await {
            if task.status.is_terminal() {
                return task.status;
            }
        }
    }
    panic!("task {task_id} did not settle in time");
}

/// Waits for the registry to show the expected agent status.
async fn wait_agent_status(engine: &Arc<OrchestrationEngine>, id: &str, expected: AgentStatus) {
    for _ in 0..200 {
        let status = engine
            .agent(id)
            .await
            .expect("registry")
            .expect("agent tracked")
            .status;
        if status == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("agent {id} never reached {expected}");
}

/// Waits for the lifecycle monitor to reflect a status into the state
/// map; the monitor runs asynchronously behind the event bus.
async fn wait_state_status(engine: &Arc<OrchestrationEngine>, id: &str, expected: &str) {
    for _ in 0..200 {
        if let Some(state) = engine.state().get_state(EntityKind::Agent, id).await {
            if state["status"] == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("state for agent {id} never reached '{expected}'");
}

async fn started_agent(harness: &Harness, cpu: u64) -> AgentRecord {
    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: format!("agent-{}", Uuid::new_v4()),
                resources: cpu_spec(cpu),
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create agent");
    let task = harness
        .engine
        .start_agent(&record.id, "alice")
        .await
        .expect("start agent");
    assert_eq!(drive_task(&harness.engine, task).await, TaskStatus::Completed);
    wait_agent_status(&harness.engine, &record.id, AgentStatus::Running).await;
    record
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_agent_records_everywhere() {
    let harness = default_harness();
    let mut events = harness.engine.subscribe();

    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "ingest".into(),
                tags: vec!["etl".into()],
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create agent");

    assert_eq!(record.status, AgentStatus::Stopped);
    assert_eq!(record.owner_id, "alice");

    let stored = harness
        .engine
        .agent(&record.id)
        .await
        .expect("registry")
        .expect("tracked");
    assert_eq!(stored.name, "ingest");

    let state = harness
        .engine
        .state()
        .get_state(EntityKind::Agent, &record.id)
        .await
        .expect("state entry");
    assert_eq!(state["status"], "stopped");

    let event = events.recv().await.expect("event");
    assert_eq!(event.kind, EventKind::AgentCreated);
}

#[tokio::test]
async fn test_create_agent_rejects_duplicate_name_per_owner() {
    let harness = default_harness();
    let spec = AgentSpec {
        name: "ingest".into(),
        ..Default::default()
    };
    harness
        .engine
        .create_agent(spec.clone(), "alice")
        .await
        .expect("first create");

    assert!(matches!(
        harness.engine.create_agent(spec.clone(), "alice").await,
        Err(MaestroError::Registry(_))
    ));
    // A different owner may reuse the name.
    harness
        .engine
        .create_agent(spec, "bob")
        .await
        .expect("other owner");
}

#[tokio::test]
async fn test_create_agent_requires_permission() {
    let harness = build_engine(
        EngineConfig::default(),
        Arc::new(MemoryRegistry::new()),
        Arc::new(RbacPolicy::new()),
        Arc::new(NoopWorkflowEngine),
    );
    assert!(matches!(
        harness
            .engine
            .create_agent(
                AgentSpec {
                    name: "ingest".into(),
                    ..Default::default()
                },
                "mallory",
            )
            .await,
        Err(MaestroError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_start_agent_happy_path() {
    let harness = default_harness();
    let record = started_agent(&harness, 40).await;

    // The allocation is live and booked.
    let report = harness.engine.resource_report();
    assert_eq!(report.usage.cpu, 40);
    assert_eq!(report.active_allocations.len(), 1);
    assert_eq!(report.active_allocations[0].owner_id, record.id);

    // The transactional record landed: agent entity plus allocation
    // entity, and the lifecycle monitor flipped the status to running.
    wait_state_status(&harness.engine, &record.id, "running").await;

    let history = harness
        .engine
        .entity_history(EntityKind::Agent, &record.id, 10)
        .await;
    assert!(!history.is_empty());
}

#[tokio::test]
async fn test_start_agent_denied_for_stranger() {
    // Seed the registry directly; create_agent would be denied under an
    // empty policy.
    let registry = Arc::new(MemoryRegistry::new());
    let record = AgentRecord::new("ingest", "alice");
    let id = record.id.clone();
    registry.insert_agent(record).await.expect("insert");

    let harness = build_engine(
        EngineConfig::default(),
        registry,
        Arc::new(RbacPolicy::new()),
        Arc::new(NoopWorkflowEngine),
    );

    assert!(matches!(
        harness.engine.start_agent(&id, "mallory").await,
        Err(MaestroError::PermissionDenied(_))
    ));
    // The owner is always allowed, role or not.
    harness
        .engine
        .start_agent(&id, "alice")
        .await
        .expect("owner may start");
}

#[tokio::test]
async fn test_start_agent_requires_running_dependencies() {
    let harness = default_harness();

    let upstream = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "upstream".into(),
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create upstream");

    let downstream = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "downstream".into(),
                dependencies: vec![upstream.id.clone()],
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create downstream");

    // Upstream is stopped: the start must refuse.
    assert!(matches!(
        harness.engine.start_agent(&downstream.id, "alice").await,
        Err(MaestroError::DependencyUnsatisfied(_))
    ));

    // Bring upstream to running, then the start goes through.
    let task = harness
        .engine
        .start_agent(&upstream.id, "alice")
        .await
        .expect("start upstream");
    drive_task(&harness.engine, task).await;
    wait_agent_status(&harness.engine, &upstream.id, AgentStatus::Running).await;

    let task = harness
        .engine
        .start_agent(&downstream.id, "alice")
        .await
        .expect("start downstream");
    assert_eq!(drive_task(&harness.engine, task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_start_agent_missing_dependency_record() {
    let harness = default_harness();
    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "orphan".into(),
                dependencies: vec!["agent-missing".into()],
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create");

    assert!(matches!(
        harness.engine.start_agent(&record.id, "alice").await,
        Err(MaestroError::DependencyUnsatisfied(_))
    ));
}

#[tokio::test]
async fn test_start_agent_admission_failure_leaves_no_trace() {
    let harness = default_harness(); // cpu limit 100
    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "greedy".into(),
                resources: cpu_spec(150),
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create");

    assert!(matches!(
        harness.engine.start_agent(&record.id, "alice").await,
        Err(MaestroError::InsufficientResources(_))
    ));

    // No allocation, no status change, no queued task.
    assert!(harness.engine.resource_report().usage.is_zero());
    assert_eq!(
        harness
            .engine
            .agent(&record.id)
            .await
            .expect("registry")
            .expect("tracked")
            .status,
        AgentStatus::Stopped
    );
    let status = harness.engine.queue_status().await;
    assert_eq!(status.high + status.medium + status.low, 0);
}

#[tokio::test]
async fn test_start_agent_releases_allocation_when_later_step_fails() {
    let registry = Arc::new(BrokenStatusRegistry {
        inner: MemoryRegistry::new(),
    });
    let record = AgentRecord::new("ingest", "alice").with_resources(cpu_spec(60));
    let id = record.id.clone();
    registry.insert_agent(record).await.expect("insert");

    let harness = build_engine(
        EngineConfig {
            limits: cpu_limits(100),
            ..Default::default()
        },
        registry,
        Arc::new(AllowAll),
        Arc::new(NoopWorkflowEngine),
    );

    let result = harness.engine.start_agent(&id, "alice").await;
    assert!(matches!(result, Err(MaestroError::Registry(_))));

    // The admission from the failed start must have been credited back.
    assert!(harness.engine.resource_report().usage.is_zero());
    assert!(harness
        .engine
        .resource_report()
        .active_allocations
        .is_empty());
}

#[tokio::test]
async fn test_terminal_start_failure_marks_error_and_frees_resources() {
    let harness = build_engine(
        EngineConfig {
            limits: cpu_limits(100),
            lifecycle_max_retries: 1,
            ..Default::default()
        },
        Arc::new(MemoryRegistry::new()),
        Arc::new(AllowAll),
        Arc::new(FailingWorkflow),
    );

    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "doomed".into(),
                resources: cpu_spec(30),
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create");

    let task = harness
        .engine
        .start_agent(&record.id, "alice")
        .await
        .expect("start accepted");
    assert_eq!(drive_task(&harness.engine, task).await, TaskStatus::Failed);

    // The monitor reflects the terminal failure and frees the footprint.
    wait_agent_status(&harness.engine, &record.id, AgentStatus::Error).await;
    for _ in 0..100 {
        if harness.engine.resource_report().usage.is_zero() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.engine.resource_report().usage.is_zero());

    wait_state_status(&harness.engine, &record.id, "error").await;
    let state = harness
        .engine
        .state()
        .get_state(EntityKind::Agent, &record.id)
        .await
        .expect("state entry");
    assert!(state["last_error"].as_str().is_some());

    // An errored agent may be started again once the cause is fixed.
    let retry = harness.engine.start_agent(&record.id, "alice").await;
    assert!(retry.is_ok());
}

#[tokio::test]
async fn test_stop_agent_happy_path() {
    let harness = default_harness();
    let record = started_agent(&harness, 40).await;

    let task = harness
        .engine
        .stop_agent(&record.id, "alice")
        .await
        .expect("stop accepted");
    assert_eq!(drive_task(&harness.engine, task).await, TaskStatus::Completed);
    wait_agent_status(&harness.engine, &record.id, AgentStatus::Stopped).await;

    assert!(harness.engine.resource_report().usage.is_zero());
    wait_state_status(&harness.engine, &record.id, "stopped").await;
}

#[tokio::test]
async fn test_stop_agent_refused_while_dependents_run() {
    let harness = default_harness();
    let upstream = started_agent(&harness, 10).await;

    let downstream = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "downstream".into(),
                dependencies: vec![upstream.id.clone()],
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create downstream");
    let task = harness
        .engine
        .start_agent(&downstream.id, "alice")
        .await
        .expect("start downstream");
    drive_task(&harness.engine, task).await;
    wait_agent_status(&harness.engine, &downstream.id, AgentStatus::Running).await;

    assert!(matches!(
        harness.engine.stop_agent(&upstream.id, "alice").await,
        Err(MaestroError::DependencyUnsatisfied(_))
    ));

    // Stop the dependent first, then the upstream goes down cleanly.
    let task = harness
        .engine
        .stop_agent(&downstream.id, "alice")
        .await
        .expect("stop downstream");
    drive_task(&harness.engine, task).await;
    wait_agent_status(&harness.engine, &downstream.id, AgentStatus::Stopped).await;

    harness
        .engine
        .stop_agent(&upstream.id, "alice")
        .await
        .expect("stop upstream");
}

#[tokio::test]
async fn test_stop_agent_requires_running_status() {
    let harness = default_harness();
    let record = harness
        .engine
        .create_agent(
            AgentSpec {
                name: "idle".into(),
                ..Default::default()
            },
            "alice",
        )
        .await
        .expect("create");

    assert!(matches!(
        harness.engine.stop_agent(&record.id, "alice").await,
        Err(MaestroError::Registry(_))
    ));
}

#[tokio::test]
async fn test_rbac_roles_authorize_non_owners() {
    let mut policy = RbacPolicy::new();
    policy.define_role(maestro_security::Role {
        name: "operator".into(),
        grants: vec![maestro_security::RoleGrant {
            resource: ResourceType::Agent,
            actions: vec![Action::Start, Action::Stop],
        }],
    });
    policy.assign("carol", "operator");

    let registry = Arc::new(MemoryRegistry::new());
    let record = AgentRecord::new("shared", "alice");
    let id = record.id.clone();
    registry.insert_agent(record).await.expect("insert");

    let harness = build_engine(
        EngineConfig::default(),
        registry,
        Arc::new(policy),
        Arc::new(NoopWorkflowEngine),
    );

    // Carol holds the operator role and may start someone else's agent.
    let task = harness
        .engine
        .start_agent(&id, "carol")
        .await
        .expect("operator may start");
    assert_eq!(drive_task(&harness.engine, task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_lifecycle_event_stream() {
    let harness = default_harness();
    let mut events = harness.engine.subscribe();

    let record = started_agent(&harness, 10).await;
    harness
        .engine
        .stop_agent(&record.id, "alice")
        .await
        .expect("stop");

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::AgentCreated));
    assert!(kinds.contains(&EventKind::AgentStarted));
    assert!(kinds.contains(&EventKind::TaskCompleted));
    assert!(kinds.contains(&EventKind::AgentStopped));
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Priority class selecting the lane a task is queued into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lifecycle-critical work, scanned first.
    High,
    /// Default class.
    Medium,
    /// Background work, scanned last.
    Low,
}

impl Priority {
    /// Lanes in scan order.
    pub const LANES: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Default numeric weight for ordering within the lane.
    pub fn default_weight(self) -> u32 {
        match self {
            Priority::High => 100,
            Priority::Medium => 50,
            Priority::Low => 10,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Status of a task in the scheduler.
///
/// Transitions: `Pending → Processing → {Completed, Failed, Cancelled}`,
/// plus `Processing → Pending` on a retried failure while the retry
/// budget lasts. `Completed`, `Failed`, and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for dependencies and a concurrency slot.
    Pending,
    /// Currently executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Retry budget exhausted.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl TaskStatus {
    /// True for absorbing states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Cooperative cancellation flag handed to execution bodies.
///
/// The scheduler never preempts a running body; it flips this flag and
/// stops waiting. Long-running executors should poll it at convenient
/// points and bail out early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller-provided description of a task to submit.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// The entity the task acts on behalf of (an agent id, typically).
    pub owner_id: String,
    /// Executor dispatch key (`agent.start`, `agent.stop`, ...).
    pub kind: String,
    /// Lane selection.
    pub priority: Priority,
    /// Ordering weight within the lane; defaults from the priority class.
    pub weight: u32,
    /// Task ids that must be `Completed` before this task may run.
    pub dependencies: Vec<Uuid>,
    /// Retry budget: a task with `max_retries = n` is attempted at most
    /// `n + 1` times.
    pub max_retries: u32,
    /// Per-attempt execution budget.
    pub timeout: Duration,
    /// Opaque payload forwarded to the executor.
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// Default per-attempt timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a spec with medium priority, no dependencies, no retries.
    pub fn new(owner_id: impl Into<String>, kind: impl Into<String>) -> Self {
        let priority = Priority::Medium;
        Self {
            owner_id: owner_id.into(),
            kind: kind.into(),
            priority,
            weight: priority.default_weight(),
            dependencies: Vec::new(),
            max_retries: 0,
            timeout: Self::DEFAULT_TIMEOUT,
            payload: serde_json::Value::Null,
        }
    }

    /// Sets the priority class (and resets the weight to its default).
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self.weight = priority.default_weight();
        self
    }

    /// Overrides the ordering weight within the lane.
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the dependency list.
    pub fn dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches an opaque payload for the executor.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A task tracked by the scheduler.
///
/// Tasks are retained after reaching a terminal state so the submission
/// history stays auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// The entity the task acts on behalf of.
    pub owner_id: String,
    /// Executor dispatch key.
    pub kind: String,
    /// Lane selection.
    pub priority: Priority,
    /// Ordering weight within the lane.
    pub weight: u32,
    /// Current status.
    pub status: TaskStatus,
    /// Task ids that must complete first.
    pub dependencies: Vec<Uuid>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// When the current (or last) attempt began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Error text from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Opaque payload forwarded to the executor.
    pub payload: serde_json::Value,
    /// Monotonic submission counter, FIFO tie-break within a lane.
    pub seq: u64,
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: spec.owner_id,
            kind: spec.kind,
            priority: spec.priority,
            weight: spec.weight,
            status: TaskStatus::Pending,
            dependencies: spec.dependencies,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            timeout_ms: spec.timeout.as_millis() as u64,
            last_error: None,
            payload: spec.payload,
            seq,
        }
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-lane pending counts plus live totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Pending tasks in the high lane.
    pub high: usize,
    /// Pending tasks in the medium lane.
    pub medium: usize,
    /// Pending tasks in the low lane.
    pub low: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Terminal completed count.
    pub completed: usize,
    /// Terminal failed count.
    pub failed: usize,
    /// Terminal cancelled count.
    pub cancelled: usize,
}

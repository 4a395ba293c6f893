use crate::executor::TaskExecutor;
use crate::queue::TaskQueue;
use crate::task::{CancelFlag, QueueStatus, Task, TaskSpec, TaskStatus};
use chrono::Utc;
use maestro_core::{EventBus, EventKind, MaestroError, MaestroResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default bound on concurrently executing tasks.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default cadence for the background tick loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

struct SchedulerInner {
    queue: RwLock<TaskQueue>,
    executors: parking_lot::RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
    flags: parking_lot::RwLock<HashMap<Uuid, CancelFlag>>,
    bus: EventBus,
    max_concurrent: usize,
    active: AtomicUsize,
    ticking: AtomicBool,
    seq: AtomicU64,
}

/// Cooperative task scheduler with three priority lanes.
///
/// Work is admitted with [`submit`], picked up by [`tick`] under the
/// concurrency bound, executed against a per-task timeout, and retried on
/// failure while the retry budget lasts. Submission never blocks on
/// in-flight execution. Cloning is cheap and shares the scheduler.
///
/// Ordering guarantee: lane priority plus FIFO-within-lane (by weight,
/// then submission order) governs *dequeue* order only; nothing is
/// promised about completion order across concurrently running tasks.
///
/// [`submit`]: Scheduler::submit
/// [`tick`]: Scheduler::tick
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler publishing events on `bus`.
    pub fn new(max_concurrent: usize, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: RwLock::new(TaskQueue::new()),
                executors: parking_lot::RwLock::new(HashMap::new()),
                flags: parking_lot::RwLock::new(HashMap::new()),
                bus,
                max_concurrent,
                active: AtomicUsize::new(0),
                ticking: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Registers the execution body for a task kind, replacing any
    /// previous registration.
    pub fn register_executor(&self, kind: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.inner.executors.write().insert(kind.into(), executor);
    }

    /// Enqueues a task and returns its id.
    pub async fn submit(&self, spec: TaskSpec) -> Uuid {
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        let task = Task::from_spec(spec, seq);
        let id = task.id;
        let payload = serde_json::json!({
            "task_id": id,
            "kind": task.kind,
            "owner_id": task.owner_id,
            "priority": task.priority.to_string(),
        });

        // Flag first: the task may be claimed the moment it is queued.
        self.inner.flags.write().insert(id, CancelFlag::new());
        self.inner.queue.write().await.insert(task);
        self.inner.bus.emit(EventKind::TaskCreated, payload);

        debug!(task_id = %id, "task submitted");
        id
    }

    /// One scheduling pass: starts eligible tasks until the concurrency
    /// bound is reached or no candidate remains.
    ///
    /// Re-entrant invocation (from an overlapping timer callback, say) is
    /// suppressed by an in-flight guard and returns immediately.
    pub async fn tick(&self) {
        if self.inner.ticking.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            if self.inner.active.load(Ordering::SeqCst) >= self.inner.max_concurrent {
                break;
            }

            let claimed = {
                let mut queue = self.inner.queue.write().await;
                match queue.next_eligible() {
                    None => None,
                    Some(id) => {
                        queue.remove_from_lane(id);
                        queue.get_mut(id).map(|task| {
                            task.status = TaskStatus::Processing;
                            task.started_at = Some(Utc::now());
                            task.clone()
                        })
                    }
                }
            };

            let Some(task) = claimed else { break };

            self.inner.active.fetch_add(1, Ordering::SeqCst);
            self.inner.bus.emit(
                EventKind::TaskStarted,
                serde_json::json!({
                    "task_id": task.id,
                    "kind": task.kind,
                    "attempt": task.retry_count + 1,
                }),
            );

            let inner = self.inner.clone();
            tokio::spawn(async move {
                run_attempt(inner, task).await;
            });
        }

        self.inner.ticking.store(false, Ordering::SeqCst);
    }

    /// Cancels a pending or processing task.
    ///
    /// A pending task leaves its lane immediately. A processing task has
    /// its [`CancelFlag`] flipped; the scheduler stops waiting on the
    /// attempt and will never retry it, but the execution body is not
    /// preempted. Cancelled tasks are terminal and never retried.
    pub async fn cancel(&self, id: Uuid) -> MaestroResult<()> {
        let emit = {
            let mut queue = self.inner.queue.write().await;
            let task = queue
                .get_mut(id)
                .ok_or_else(|| MaestroError::NotFound(format!("task {id}")))?;

            match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    queue.remove_from_lane(id);
                }
                TaskStatus::Processing => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    if let Some(flag) = self.inner.flags.read().get(&id) {
                        flag.cancel();
                    }
                }
                status => {
                    return Err(MaestroError::Scheduler(format!(
                        "task {id} is {status:?} and cannot be cancelled"
                    )));
                }
            }
            serde_json::json!({ "task_id": id })
        };

        self.inner.flags.write().remove(&id);
        self.inner.bus.emit(EventKind::TaskCancelled, emit);
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    /// Snapshot of a tracked task.
    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.inner.queue.read().await.get(id).cloned()
    }

    /// Per-lane counts plus the live execution counter.
    pub async fn queue_status(&self) -> QueueStatus {
        let active = self.inner.active.load(Ordering::SeqCst);
        self.inner.queue.read().await.status(active)
    }

    /// Number of currently executing tasks.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Starts the background tick loop on the runtime.
    ///
    /// Returns the [`JoinHandle`] so the caller can abort it on shutdown.
    pub fn run(&self, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        })
    }
}

/// Runs one attempt of `task` and records the outcome.
async fn run_attempt(inner: Arc<SchedulerInner>, task: Task) {
    let flag = inner
        .flags
        .read()
        .get(&task.id)
        .cloned()
        .unwrap_or_default();
    let executor = inner.executors.read().get(&task.kind).cloned();

    let outcome = match executor {
        None => Err(MaestroError::TaskExecution(format!(
            "no executor registered for kind '{}'",
            task.kind
        ))),
        Some(executor) => {
            match tokio::time::timeout(task.timeout(), executor.execute(&task, &flag)).await {
                Ok(result) => result,
                Err(_) => Err(MaestroError::TaskTimeout(task.timeout_ms)),
            }
        }
    };

    finish_attempt(&inner, task.id, outcome).await;
    inner.active.fetch_sub(1, Ordering::SeqCst);
}

/// Applies an attempt's outcome: completion, retry re-enqueue, or
/// terminal failure. A task cancelled mid-flight is left untouched.
async fn finish_attempt(
    inner: &Arc<SchedulerInner>,
    id: Uuid,
    outcome: MaestroResult<serde_json::Value>,
) {
    let event = {
        let mut queue = inner.queue.write().await;
        let Some(task) = queue.get_mut(id) else {
            warn!(task_id = %id, "finished attempt for unknown task");
            return;
        };

        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %id, "attempt settled after cancellation, dropping outcome");
            None
        } else {
            match outcome {
                Ok(data) => {
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(Utc::now());
                    info!(task_id = %id, kind = %task.kind, "task completed");
                    Some((
                        EventKind::TaskCompleted,
                        serde_json::json!({
                            "task_id": id,
                            "kind": task.kind,
                            "owner_id": task.owner_id,
                            "result": data,
                        }),
                    ))
                }
                Err(e) => {
                    task.last_error = Some(e.to_string());
                    if task.retry_count < task.max_retries {
                        task.retry_count += 1;
                        task.status = TaskStatus::Pending;
                        task.started_at = None;
                        warn!(
                            task_id = %id,
                            retry = task.retry_count,
                            max_retries = task.max_retries,
                            error = %e,
                            "attempt failed, re-enqueueing"
                        );
                        queue.requeue(id);
                        None
                    } else {
                        task.status = TaskStatus::Failed;
                        task.completed_at = Some(Utc::now());
                        let attempts = task.retry_count + 1;
                        error!(task_id = %id, attempts, error = %e, "task failed terminally");
                        Some((
                            EventKind::TaskFailed,
                            serde_json::json!({
                                "task_id": id,
                                "kind": task.kind,
                                "owner_id": task.owner_id,
                                "error": e.to_string(),
                                "attempts": attempts,
                            }),
                        ))
                    }
                }
            }
        }
    };

    if let Some((kind, payload)) = event {
        if kind == EventKind::TaskCompleted || kind == EventKind::TaskFailed {
            inner.flags.write().remove(&id);
        }
        inner.bus.emit(kind, payload);
    }
}

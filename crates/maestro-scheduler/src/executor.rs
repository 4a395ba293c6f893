use crate::task::{CancelFlag, Task};
use async_trait::async_trait;
use maestro_core::MaestroResult;

/// Execution body for a task kind.
///
/// Executors are registered on the scheduler keyed by [`Task::kind`] and
/// invoked once per attempt, racing the task's timeout. An executor that
/// returns `Err` (or loses the race) is retried by the scheduler while
/// the retry budget lasts; it must therefore be safe to call again.
///
/// Cancellation is cooperative: the scheduler flips `cancel` and stops
/// waiting, but the body is never preempted. Long-running executors
/// should poll [`CancelFlag::is_cancelled`] and bail out early.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs one attempt of `task`, returning an opaque result payload.
    async fn execute(&self, task: &Task, cancel: &CancelFlag) -> MaestroResult<serde_json::Value>;
}

use crate::task::{Priority, QueueStatus, Task, TaskStatus};
use std::cmp::Reverse;
use std::collections::HashMap;
use uuid::Uuid;

/// Three-lane priority queue over the task store.
///
/// Each lane holds pending task ids sorted by descending weight, ties
/// broken by submission order (`seq` ascending). Tasks stay in the store
/// after leaving the lanes; terminal tasks are retained for audit.
pub struct TaskQueue {
    tasks: HashMap<Uuid, Task>,
    lanes: [Vec<Uuid>; 3],
}

fn lane_index(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Medium => 1,
        Priority::Low => 2,
    }
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            lanes: [Vec::new(), Vec::new(), Vec::new()],
        }
    }

    /// Adds a new task to the store and its lane.
    pub fn insert(&mut self, task: Task) -> Uuid {
        let id = task.id;
        let lane = lane_index(task.priority);
        let key = (Reverse(task.weight), task.seq);
        self.tasks.insert(id, task);

        let tasks = &self.tasks;
        let lane = &mut self.lanes[lane];
        let pos = lane.partition_point(|queued| {
            tasks
                .get(queued)
                .map(|t| (Reverse(t.weight), t.seq) <= key)
                .unwrap_or(false)
        });
        lane.insert(pos, id);
        id
    }

    /// Puts an existing (retried) task back into its lane.
    pub fn requeue(&mut self, id: Uuid) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let lane = lane_index(task.priority);
        let key = (Reverse(task.weight), task.seq);

        let tasks = &self.tasks;
        let lane = &mut self.lanes[lane];
        if lane.contains(&id) {
            return;
        }
        let pos = lane.partition_point(|queued| {
            tasks
                .get(queued)
                .map(|t| (Reverse(t.weight), t.seq) <= key)
                .unwrap_or(false)
        });
        lane.insert(pos, id);
    }

    /// True when every dependency resolves to a `Completed` task.
    ///
    /// An unknown dependency id never satisfies, so such a task is
    /// skipped on every scan rather than crashing the scheduler.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    }

    /// First eligible pending task, scanning lanes high → medium → low
    /// and each lane front to back. Dependency-blocked candidates are
    /// skipped in place and reconsidered on the next scan.
    pub fn next_eligible(&self) -> Option<Uuid> {
        for lane in &self.lanes {
            for id in lane {
                if let Some(task) = self.tasks.get(id) {
                    if task.status == TaskStatus::Pending && self.dependencies_met(task) {
                        return Some(*id);
                    }
                }
            }
        }
        None
    }

    /// Removes a task id from its lane (it stays in the store).
    pub fn remove_from_lane(&mut self, id: Uuid) {
        for lane in &mut self.lanes {
            if let Some(pos) = lane.iter().position(|queued| *queued == id) {
                lane.remove(pos);
                return;
            }
        }
    }

    /// Task by id.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Mutable task by id.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Per-lane pending counts plus terminal totals. `active` is supplied
    /// by the scheduler, which owns the live counter.
    pub fn status(&self, active: usize) -> QueueStatus {
        let mut status = QueueStatus {
            active,
            ..Default::default()
        };
        status.high = self.lanes[0].len();
        status.medium = self.lanes[1].len();
        status.low = self.lanes[2].len();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Completed => status.completed += 1,
                TaskStatus::Failed => status.failed += 1,
                TaskStatus::Cancelled => status.cancelled += 1,
                _ => {}
            }
        }
        status
    }

    /// All task ids in the store, in no particular order.
    pub fn task_ids(&self) -> Vec<Uuid> {
        self.tasks.keys().copied().collect()
    }

    /// Total number of tracked tasks (including terminal ones).
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no tasks are tracked at all.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-realm registry of pending wait tasks.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::identifiers::WaitTaskId;

use super::wait_task::WaitTask;

// ============================================================================
// TaskManager
// ============================================================================

/// Pending wait tasks of one realm.
///
/// Callbacks into tasks always run outside the lock, so a task may remove
/// itself while being rerun or terminated.
#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<FxHashMap<WaitTaskId, WaitTask>>,
}

impl TaskManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task.
    pub fn add(&self, task: WaitTask) {
        self.tasks.lock().insert(task.id(), task);
    }

    /// Unregisters a task. Returns `true` if it was registered.
    pub fn delete(&self, id: WaitTaskId) -> bool {
        self.tasks.lock().remove(&id).is_some()
    }

    /// Returns the number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns `true` if no task is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Restarts every pending task.
    pub fn rerun_all(&self) {
        let snapshot: Vec<WaitTask> = self.tasks.lock().values().cloned().collect();
        for task in snapshot {
            task.rerun();
        }
    }

    /// Rejects and removes every pending task.
    pub fn terminate_all(&self, error: impl Fn() -> Error) {
        let drained: Vec<WaitTask> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        for task in drained {
            task.terminate(error());
        }
    }
}

use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId};
use crate::storage::{TaskRepository, TaskStore, awaiting_reminder, build_task};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

struct Inner {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, Task>,
    fail_reads: bool,
}

/// Volatile store for tests and embedding.
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                tasks: BTreeMap::new(),
                fail_reads: false,
            }),
        }
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for task in tasks {
                inner.next_id = inner.next_id.max(task.id + 1);
                inner.tasks.insert(task.id, task);
            }
        }
        store
    }

    /// Makes every read fail, to exercise degraded paths.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn readable(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(AppError::io("store unavailable"));
        }
        Ok(inner)
    }
}

impl TaskStore for MemoryTaskStore {
    fn pending_with_reminder(&self) -> Result<Vec<Task>, AppError> {
        Ok(self
            .readable()?
            .tasks
            .values()
            .filter(|task| awaiting_reminder(task))
            .cloned()
            .collect())
    }

    fn get_task(&self, id: TaskId) -> Result<Option<Task>, AppError> {
        Ok(self.readable()?.tasks.get(&id).cloned())
    }

    fn record_alarm(&self, id: TaskId, alarm_time: Option<i64>) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.alarm_time = alarm_time;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_alarm_if(&self, id: TaskId, expected: i64) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.tasks.get_mut(&id) {
            Some(task) if task.alarm_time == Some(expected) => {
                task.alarm_time = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl TaskRepository for MemoryTaskStore {
    fn insert(&self, new_task: NewTask, created_at: String) -> Result<Task, AppError> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let task = build_task(id, new_task, created_at);
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    fn update(&self, task: &Task) -> Result<(), AppError> {
        let mut inner = self.lock();
        match inner.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(AppError::invalid_input("task not found")),
        }
    }

    fn delete(&self, id: TaskId) -> Result<Option<Task>, AppError> {
        Ok(self.lock().tasks.remove(&id))
    }

    fn all(&self) -> Result<Vec<Task>, AppError> {
        Ok(self.readable()?.tasks.values().cloned().collect())
    }
}

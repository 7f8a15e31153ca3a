use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId};

pub mod json_store;
mod memory;

pub use json_store::JsonTaskStore;
pub use memory::MemoryTaskStore;

/// What the reminder subsystem needs from task storage.
pub trait TaskStore: Send + Sync {
    /// Pending tasks with a reminder requested and both due fields set.
    fn pending_with_reminder(&self) -> Result<Vec<Task>, AppError>;

    fn get_task(&self, id: TaskId) -> Result<Option<Task>, AppError>;

    /// Persists `alarm_time` for a task. Returns `false` when the row no
    /// longer exists.
    fn record_alarm(&self, id: TaskId, alarm_time: Option<i64>) -> Result<bool, AppError>;

    /// Clears `alarm_time` only while it still equals `expected`, in one
    /// step. Returns whether it was cleared.
    fn clear_alarm_if(&self, id: TaskId, expected: i64) -> Result<bool, AppError>;
}

/// Full CRUD surface used by the task API.
pub trait TaskRepository: TaskStore {
    fn insert(&self, new_task: NewTask, created_at: String) -> Result<Task, AppError>;

    fn update(&self, task: &Task) -> Result<(), AppError>;

    fn delete(&self, id: TaskId) -> Result<Option<Task>, AppError>;

    fn all(&self) -> Result<Vec<Task>, AppError>;
}

pub(crate) fn awaiting_reminder(task: &Task) -> bool {
    !task.is_completed() && task.has_reminder && task.has_due_date() && task.has_due_time()
}

pub(crate) fn build_task(id: TaskId, new_task: NewTask, created_at: String) -> Task {
    Task {
        id,
        title: new_task.title,
        description: new_task.description,
        status: crate::model::TaskStatus::Pending,
        created_at,
        completed_at: None,
        due_date: new_task.due_date,
        due_time: new_task.due_time,
        has_reminder: new_task.has_reminder,
        alarm_time: None,
        category: new_task
            .category
            .unwrap_or_else(|| crate::model::DEFAULT_CATEGORY.to_string()),
        priority: new_task.priority.unwrap_or(crate::model::DEFAULT_PRIORITY),
    }
}

use crate::alarm::{is_overdue, validate_due_date, validate_due_time};
use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId, TaskStatus};
use crate::scheduler::ReminderScheduler;
use crate::storage::TaskRepository;
use std::sync::Arc;
use time::UtcOffset;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFilter {
    #[default]
    All,
    Pending,
    Completed,
}

/// Partial update for `edit`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub due_time: Option<String>,
    /// Drops both due fields and the reminder that depended on them.
    pub clear_due: bool,
    pub category: Option<String>,
    pub priority: Option<u8>,
}

impl TaskEdit {
    fn is_empty(&self) -> bool {
        self == &TaskEdit::default()
    }

    fn touches_due(&self) -> bool {
        self.clear_due || self.due_date.is_some() || self.due_time.is_some()
    }
}

/// Task CRUD with the reminder lifecycle hooked into every transition.
pub struct TaskApi {
    repo: Arc<dyn TaskRepository>,
    scheduler: Arc<ReminderScheduler>,
}

impl TaskApi {
    pub fn new(repo: Arc<dyn TaskRepository>, scheduler: Arc<ReminderScheduler>) -> Self {
        Self { repo, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.scheduler
    }

    pub fn add(&self, new_task: NewTask) -> Result<Task, AppError> {
        let title = required_title(&new_task.title)?;
        let due_date = optional_text(new_task.due_date.as_deref());
        let due_time = optional_text(new_task.due_time.as_deref());
        if let Some(date) = due_date.as_deref() {
            validate_due_date(date)?;
        }
        if let Some(time) = due_time.as_deref() {
            validate_due_time(time)?;
        }
        if due_time.is_some() && due_date.is_none() {
            return Err(AppError::invalid_input("due time requires a due date"));
        }
        let priority = new_task.priority.map(check_priority).transpose()?;

        let new_task = NewTask {
            title,
            description: optional_text(new_task.description.as_deref()),
            due_date,
            due_time,
            has_reminder: new_task.has_reminder,
            category: optional_text(new_task.category.as_deref()),
            priority,
        };
        let task = self.repo.insert(new_task, self.timestamp()?)?;
        tracing::info!(task_id = task.id, "task added");

        if task.has_reminder {
            self.arm_lenient(&task);
            return self.get(task.id);
        }
        Ok(task)
    }

    pub fn edit(&self, id: TaskId, edit: TaskEdit) -> Result<Task, AppError> {
        if edit.is_empty() {
            return Err(AppError::invalid_input("nothing to update"));
        }
        let mut task = self.get(id)?;
        let previous_due = (task.due_date.clone(), task.due_time.clone());

        if let Some(title) = edit.title.as_deref() {
            task.title = required_title(title)?;
        }
        if let Some(description) = edit.description.as_deref() {
            task.description = optional_text(Some(description));
        }
        if let Some(category) = edit.category.as_deref() {
            task.category = optional_text(Some(category))
                .ok_or_else(|| AppError::invalid_input("category must not be empty"))?;
        }
        if let Some(priority) = edit.priority {
            task.priority = check_priority(priority)?;
        }

        if edit.clear_due {
            task.due_date = None;
            task.due_time = None;
            task.has_reminder = false;
        }
        if let Some(date) = edit.due_date.as_deref() {
            validate_due_date(date)?;
            task.due_date = Some(date.trim().to_string());
        }
        if let Some(time) = edit.due_time.as_deref() {
            validate_due_time(time)?;
            task.due_time = Some(time.trim().to_string());
        }
        if task.due_time.is_some() && task.due_date.is_none() {
            return Err(AppError::invalid_input("due time requires a due date"));
        }

        let due_changed = previous_due != (task.due_date.clone(), task.due_time.clone());
        self.repo.update(&task)?;
        tracing::info!(task_id = id, due_changed, "task edited");

        if edit.touches_due() && due_changed {
            if task.has_reminder {
                self.arm_lenient(&task);
            } else {
                self.cancel_lenient(id);
            }
            return self.get(id);
        }
        Ok(task)
    }

    /// Turns the reminder on or off. Turning it on fails, and leaves the
    /// flag off, when the due date/time cannot produce a future fire time.
    pub fn set_reminder(&self, id: TaskId, enabled: bool) -> Result<Task, AppError> {
        let mut task = self.get(id)?;

        if !enabled {
            task.has_reminder = false;
            self.repo.update(&task)?;
            self.scheduler.cancel(id)?;
            return self.get(id);
        }

        if task.is_completed() {
            return Err(AppError::invalid_input("task already completed"));
        }
        task.has_reminder = true;
        self.repo.update(&task)?;
        if let Err(err) = self.scheduler.arm(&task) {
            task.has_reminder = false;
            task.alarm_time = None;
            self.repo.update(&task)?;
            return Err(err);
        }
        self.get(id)
    }

    pub fn complete(&self, id: TaskId) -> Result<Task, AppError> {
        let mut task = self.get(id)?;
        if task.is_completed() {
            return Err(AppError::invalid_input("task already completed"));
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(self.timestamp()?);
        self.repo.update(&task)?;
        tracing::info!(task_id = id, "task completed");

        self.cancel_lenient(id);
        self.get(id)
    }

    /// Marks a completed task pending again and restores its reminder.
    pub fn undo(&self, id: TaskId) -> Result<Task, AppError> {
        let mut task = self.get(id)?;
        if !task.is_completed() {
            return Err(AppError::invalid_input("task is not completed"));
        }

        task.status = TaskStatus::Pending;
        task.completed_at = None;
        self.repo.update(&task)?;
        tracing::info!(task_id = id, "task reopened");

        if task.has_reminder {
            self.arm_lenient(&task);
            return self.get(id);
        }
        Ok(task)
    }

    pub fn delete(&self, id: TaskId) -> Result<Task, AppError> {
        self.get(id)?;
        self.cancel_lenient(id);
        let removed = self
            .repo
            .delete(id)?
            .ok_or_else(|| AppError::invalid_input("task not found"))?;
        tracing::info!(task_id = id, "task deleted");
        Ok(removed)
    }

    pub fn clear_completed(&self) -> Result<Vec<Task>, AppError> {
        let completed: Vec<TaskId> = self
            .repo
            .all()?
            .into_iter()
            .filter(Task::is_completed)
            .map(|task| task.id)
            .collect();

        let mut removed = Vec::with_capacity(completed.len());
        for id in completed {
            self.cancel_lenient(id);
            if let Some(task) = self.repo.delete(id)? {
                removed.push(task);
            }
        }
        tracing::info!(count = removed.len(), "completed tasks cleared");
        Ok(removed)
    }

    pub fn get(&self, id: TaskId) -> Result<Task, AppError> {
        self.repo
            .get_task(id)?
            .ok_or_else(|| AppError::invalid_input("task not found"))
    }

    /// Pending tasks first, then by due date/time (undated last), then id.
    pub fn list(&self, filter: ListFilter) -> Result<Vec<Task>, AppError> {
        let mut tasks: Vec<Task> = self
            .repo
            .all()?
            .into_iter()
            .filter(|task| match filter {
                ListFilter::All => true,
                ListFilter::Pending => !task.is_completed(),
                ListFilter::Completed => task.is_completed(),
            })
            .collect();

        tasks.sort_by(|a, b| {
            a.is_completed()
                .cmp(&b.is_completed())
                .then_with(|| due_sort_key(a).cmp(&due_sort_key(b)))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    pub fn overdue(&self) -> Result<Vec<Task>, AppError> {
        let now = self.scheduler.clock().now();
        Ok(self
            .list(ListFilter::Pending)?
            .into_iter()
            .filter(|task| is_overdue(task, now))
            .collect())
    }

    pub fn is_overdue(&self, task: &Task) -> bool {
        is_overdue(task, self.scheduler.clock().now())
    }

    fn timestamp(&self) -> Result<String, AppError> {
        self.scheduler
            .clock()
            .now()
            .to_offset(UtcOffset::UTC)
            .format(&Rfc3339)
            .map_err(|err| AppError::invalid_data(err.to_string()))
    }

    // Scheduling problems surface as notices; the task change itself stands.
    fn arm_lenient(&self, task: &Task) {
        if let Err(err) = self.scheduler.rearm(task) {
            tracing::debug!(task_id = task.id, error = %err, "task saved without reminder");
        }
    }

    fn cancel_lenient(&self, id: TaskId) {
        if let Err(err) = self.scheduler.cancel(id) {
            tracing::warn!(task_id = id, error = %err, "reminder cancel failed");
        }
    }
}

fn required_title(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("title is required"));
    }
    Ok(trimmed.to_string())
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn check_priority(priority: u8) -> Result<u8, AppError> {
    if (1..=3).contains(&priority) {
        Ok(priority)
    } else {
        Err(AppError::invalid_input("priority must be 1, 2 or 3"))
    }
}

fn due_sort_key(task: &Task) -> (bool, String) {
    match task.full_due() {
        Some(due) => (false, due),
        None => (true, String::new()),
    }
}

use crate::error::AppError;
use crate::model::TaskId;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxNotifier;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsNotifier;

use std::sync::Arc;

pub const DEFAULT_TITLE: &str = "Task Reminder";
pub const DEFAULT_BODY: &str = "Task due now!";

/// What the user sees when a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderAlert {
    pub task_id: TaskId,
    pub title: String,
    pub body: String,
}

impl ReminderAlert {
    pub fn new(task_id: TaskId, title: Option<&str>, description: Option<&str>) -> Self {
        let title = title
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        let body = description
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_BODY);
        Self {
            task_id,
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Shows alerts. Displaying twice for one task id replaces the earlier
/// alert where the platform supports it.
pub trait Notifier: Send + Sync {
    fn display(&self, alert: &ReminderAlert) -> Result<(), AppError>;
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn display(&self, _alert: &ReminderAlert) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn notifier_from_env() -> Result<Arc<dyn Notifier>, AppError> {
    if std::env::var("REMIND_DISABLE_NOTIFICATIONS").is_ok() {
        return Ok(Arc::new(NoopNotifier));
    }

    match platform_notifier() {
        Ok(notifier) => Ok(notifier),
        Err(err) => match err {
            AppError::InvalidData(_) => {
                tracing::warn!(error = %err, "desktop notifications unavailable");
                Ok(Arc::new(NoopNotifier))
            }
            other => Err(other),
        },
    }
}

const ACTION_PREFIX: &str = "show:";

pub fn activation_argument(task_id: TaskId) -> String {
    format!("{ACTION_PREFIX}{task_id}")
}

pub fn parse_activation_argument(argument: &str) -> Option<TaskId> {
    argument
        .strip_prefix(ACTION_PREFIX)
        .and_then(|id| id.trim().parse().ok())
}

/// Opens the task in a fresh CLI process when the user clicks the alert.
pub fn launch_show(task_id: TaskId) -> Result<(), AppError> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("show")
        .arg(task_id.to_string())
        .spawn()?;
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn platform_notifier() -> Result<Arc<dyn Notifier>, AppError> {
    Ok(Arc::new(LinuxNotifier))
}

#[cfg(windows)]
pub fn platform_notifier() -> Result<Arc<dyn Notifier>, AppError> {
    Ok(Arc::new(WindowsNotifier))
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn platform_notifier() -> Result<Arc<dyn Notifier>, AppError> {
    Err(AppError::invalid_data(
        "notifications are not supported on this platform",
    ))
}

//! User-visible feedback emitted while scheduling reminders.

use crate::model::TaskId;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    ReminderSet { task_id: TaskId, at: String },
    InvalidSchedule { task_id: TaskId, reason: String },
    PrecisionDegraded { task_id: TaskId },
    Failed { task_id: TaskId, reason: String },
}

impl UserNotice {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::ReminderSet { task_id, .. }
            | Self::InvalidSchedule { task_id, .. }
            | Self::PrecisionDegraded { task_id }
            | Self::Failed { task_id, .. } => *task_id,
        }
    }

    pub fn is_warning(&self) -> bool {
        !matches!(self, Self::ReminderSet { .. })
    }
}

impl fmt::Display for UserNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReminderSet { at, .. } => write!(f, "Reminder set for {at}"),
            Self::InvalidSchedule { .. } => write!(f, "Cannot set reminder: invalid date/time"),
            Self::PrecisionDegraded { .. } => write!(
                f,
                "Reminder set (inexact). Enable exact timers for better accuracy"
            ),
            Self::Failed { .. } => write!(f, "Failed to set reminder"),
        }
    }
}

pub trait NoticeSink: Send + Sync {
    fn notice(&self, notice: UserNotice);
}

/// Logs notices and drops them; for callers without a user-facing surface.
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn notice(&self, notice: UserNotice) {
        if notice.is_warning() {
            tracing::warn!(task_id = notice.task_id(), "{notice}");
        } else {
            tracing::info!(task_id = notice.task_id(), "{notice}");
        }
    }
}

/// Buffers notices until the caller drains them, e.g. to print after a
/// command finishes.
#[derive(Default)]
pub struct CollectingNoticeSink {
    notices: Mutex<Vec<UserNotice>>,
}

impl CollectingNoticeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<UserNotice> {
        let mut guard = self
            .notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }
}

impl NoticeSink for CollectingNoticeSink {
    fn notice(&self, notice: UserNotice) {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectingNoticeSink, NoticeSink, UserNotice};

    #[test]
    fn messages_match_user_wording() {
        let set = UserNotice::ReminderSet {
            task_id: 1,
            at: "9:00 AM".into(),
        };
        assert_eq!(set.to_string(), "Reminder set for 9:00 AM");
        assert!(!set.is_warning());

        let degraded = UserNotice::PrecisionDegraded { task_id: 1 };
        assert!(degraded.to_string().contains("inexact"));
        assert!(degraded.is_warning());
    }

    #[test]
    fn collecting_sink_drains_in_order() {
        let sink = CollectingNoticeSink::new();
        sink.notice(UserNotice::PrecisionDegraded { task_id: 1 });
        sink.notice(UserNotice::Failed {
            task_id: 2,
            reason: "down".into(),
        });

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].task_id(), 2);
        assert!(sink.drain().is_empty());
    }
}

//! Runs when a trigger elapses: `Armed → Fired → Consumed`.

use crate::host::{AlarmPayload, FireListener};
use crate::model::TaskId;
use crate::notify::{Notifier, ReminderAlert};
use crate::storage::TaskStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// How much the handler trusts the payload captured at arm time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireCheck {
    /// Re-read the task and drop the alert if it went stale.
    #[default]
    Recheck,
    /// Show the payload as captured, whatever happened since.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Deleted,
    Completed,
    ReminderOff,
    Rescheduled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Displayed(ReminderAlert),
    Suppressed(StaleReason),
    DisplayFailed,
}

/// Observer for fire outcomes, e.g. to echo them in an interactive session.
pub type FireObserver = Box<dyn Fn(TaskId, &FireOutcome) + Send + Sync>;

pub struct FireHandler {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    check: FireCheck,
    observer: Mutex<Option<FireObserver>>,
}

impl FireHandler {
    pub fn new(store: Arc<dyn TaskStore>, notifier: Arc<dyn Notifier>, check: FireCheck) -> Self {
        Self {
            store,
            notifier,
            check,
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: FireObserver) {
        *self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(observer);
    }

    pub fn handle(&self, task_id: TaskId, payload: &AlarmPayload) -> FireOutcome {
        let alert = match self.check {
            FireCheck::Snapshot => Ok(snapshot_alert(task_id, payload)),
            FireCheck::Recheck => self.current_alert(task_id, payload),
        };

        let outcome = match alert {
            Err(reason) => {
                tracing::warn!(task_id, ?reason, "stale reminder suppressed");
                FireOutcome::Suppressed(reason)
            }
            Ok(alert) => match self.notifier.display(&alert) {
                Ok(()) => {
                    tracing::info!(task_id, "reminder displayed");
                    FireOutcome::Displayed(alert)
                }
                Err(err) => {
                    tracing::warn!(task_id, error = %err, "reminder display failed");
                    FireOutcome::DisplayFailed
                }
            },
        };

        self.consume(task_id, payload.fire_at);
        outcome
    }

    fn current_alert(
        &self,
        task_id: TaskId,
        payload: &AlarmPayload,
    ) -> Result<ReminderAlert, StaleReason> {
        let task = match self.store.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => return Err(StaleReason::Deleted),
            Err(err) => {
                tracing::warn!(task_id, error = %err, "store unreadable at fire time, using snapshot");
                return Ok(snapshot_alert(task_id, payload));
            }
        };

        if task.is_completed() {
            return Err(StaleReason::Completed);
        }
        if !task.has_reminder {
            return Err(StaleReason::ReminderOff);
        }
        if task.alarm_time != Some(payload.fire_at) {
            return Err(StaleReason::Rescheduled);
        }

        Ok(ReminderAlert::new(
            task_id,
            Some(&task.title),
            task.description.as_deref(),
        ))
    }

    /// Clears the persisted fire time, unless the row was re-armed for a
    /// different time in the meantime.
    fn consume(&self, task_id: TaskId, fire_at: i64) {
        match self.store.clear_alarm_if(task_id, fire_at) {
            Ok(true) => tracing::debug!(task_id, "reminder consumed"),
            Ok(false) => tracing::debug!(task_id, "reminder re-armed or gone, nothing to consume"),
            Err(err) => tracing::warn!(task_id, error = %err, "could not consume reminder"),
        }
    }
}

impl FireListener for FireHandler {
    fn on_fire(&self, task_id: TaskId, payload: AlarmPayload) {
        let outcome = self.handle(task_id, &payload);
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(observer) = observer.as_ref() {
            observer(task_id, &outcome);
        }
    }
}

fn snapshot_alert(task_id: TaskId, payload: &AlarmPayload) -> ReminderAlert {
    ReminderAlert::new(
        task_id,
        Some(&payload.title),
        payload.description.as_deref(),
    )
}

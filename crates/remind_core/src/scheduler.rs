//! Arms and cancels the single outstanding trigger each task may have.
//!
//! Every registration is preceded by a cancel, so the host registry never
//! holds two triggers for one id. Operations on the same id run under a
//! per-id lock; different ids never contend beyond the lock table itself.

use crate::alarm::{alarm_time_for, format_time_for_display};
use crate::clock::Clock;
use crate::error::AppError;
use crate::host::{AlarmHost, AlarmPayload, HostError, Precision};
use crate::model::{Task, TaskId};
use crate::notice::{NoticeSink, UserNotice};
use crate::storage::{TaskStore, awaiting_reminder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed { alarm_time: i64, precision: Precision },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ReminderOff,
    Completed,
}

/// What [`ReminderScheduler::resync`] did to bring the host in line with
/// the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Unchanged,
    Armed(i64),
    Cancelled,
}

pub struct ReminderScheduler {
    store: Arc<dyn TaskStore>,
    host: Arc<dyn AlarmHost>,
    clock: Arc<dyn Clock>,
    notices: Arc<dyn NoticeSink>,
    lead_time: Duration,
    locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        host: Arc<dyn AlarmHost>,
        clock: Arc<dyn Clock>,
        notices: Arc<dyn NoticeSink>,
        lead_time: Duration,
    ) -> Self {
        Self {
            store,
            host,
            clock,
            notices,
            lead_time,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn arm(&self, task: &Task) -> Result<ArmOutcome, AppError> {
        let lock = self.lock_for(task.id);
        let _serial = hold(&lock);
        self.cancel_locked(task.id)?;
        self.arm_locked(task)
    }

    pub fn cancel(&self, task_id: TaskId) -> Result<(), AppError> {
        let lock = self.lock_for(task_id);
        let result = {
            let _serial = hold(&lock);
            self.cancel_locked(task_id)
        };
        self.release(task_id, lock);
        result
    }

    /// Cancel followed by arm, as one step for observers of this id.
    pub fn rearm(&self, task: &Task) -> Result<ArmOutcome, AppError> {
        self.arm(task)
    }

    pub fn is_armed(&self, task_id: TaskId) -> bool {
        self.host.is_armed(task_id)
    }

    pub fn armed_ids(&self) -> Vec<TaskId> {
        self.host.armed_ids()
    }

    /// Re-reads the row and arms or cancels so the host matches it. Picks
    /// up changes written by other processes.
    ///
    /// A stored fire time that is already due is left to the trigger that
    /// is firing it.
    pub fn resync(&self, task_id: TaskId) -> Result<SyncAction, AppError> {
        let lock = self.lock_for(task_id);
        let result = {
            let _serial = hold(&lock);
            self.resync_locked(task_id)
        };
        if matches!(result, Ok(SyncAction::Cancelled)) {
            self.release(task_id, lock);
        }
        result
    }

    fn resync_locked(&self, task_id: TaskId) -> Result<SyncAction, AppError> {
        let registered = self.host.registered_at(task_id);
        let Some(task) = self.store.get_task(task_id)? else {
            if registered.is_none() {
                return Ok(SyncAction::Unchanged);
            }
            self.cancel_locked(task_id)?;
            return Ok(SyncAction::Cancelled);
        };

        let wanted = task.alarm_time.filter(|_| awaiting_reminder(&task));
        let now = self.clock.now_millis();
        match (wanted, registered) {
            (Some(stored), Some(armed)) if stored == armed => Ok(SyncAction::Unchanged),
            (Some(stored), _) if stored > now => {
                tracing::info!(task_id, stored, ?registered, "reminder changed in store, re-arming");
                self.cancel_locked(task_id)?;
                match self.arm_locked(&task)? {
                    ArmOutcome::Armed { alarm_time, .. } => Ok(SyncAction::Armed(alarm_time)),
                    ArmOutcome::Skipped(_) => Ok(SyncAction::Cancelled),
                }
            }
            (Some(_), None) | (None, None) => Ok(SyncAction::Unchanged),
            (Some(_), Some(_)) | (None, Some(_)) => {
                tracing::info!(task_id, ?registered, "reminder withdrawn in store, cancelling");
                self.host
                    .cancel(task_id)
                    .map_err(|err| AppError::host_unavailable(err.to_string()))?;
                Ok(SyncAction::Cancelled)
            }
        }
    }

    fn cancel_locked(&self, task_id: TaskId) -> Result<(), AppError> {
        if let Err(err) = self.host.cancel(task_id) {
            tracing::error!(task_id, error = %err, "could not cancel reminder trigger");
            return Err(AppError::host_unavailable(err.to_string()));
        }
        self.store.record_alarm(task_id, None)?;
        tracing::debug!(task_id, "reminder cancelled");
        Ok(())
    }

    fn arm_locked(&self, task: &Task) -> Result<ArmOutcome, AppError> {
        if task.is_completed() {
            return Ok(ArmOutcome::Skipped(SkipReason::Completed));
        }
        if !task.has_reminder {
            return Ok(ArmOutcome::Skipped(SkipReason::ReminderOff));
        }

        let alarm_time = match alarm_time_for(task, self.lead_time, self.clock.now()) {
            Ok(alarm_time) => alarm_time,
            Err(err) => {
                tracing::warn!(task_id = task.id, error = %err, "cannot set reminder");
                self.notices.notice(UserNotice::InvalidSchedule {
                    task_id: task.id,
                    reason: err.message().to_string(),
                });
                return Err(err);
            }
        };

        let payload = AlarmPayload {
            title: task.title.clone(),
            description: task.description.clone(),
            fire_at: alarm_time,
        };
        let precision = self.register(task.id, alarm_time, payload)?;

        match self.store.record_alarm(task.id, Some(alarm_time)) {
            Ok(true) => {}
            Ok(false) => {
                let _ = self.host.cancel(task.id);
                return Err(AppError::invalid_input("task not found"));
            }
            Err(err) => {
                tracing::error!(task_id = task.id, error = %err, "could not persist reminder");
                let _ = self.host.cancel(task.id);
                return Err(err);
            }
        }

        if precision == Precision::Inexact {
            self.notices.notice(UserNotice::PrecisionDegraded { task_id: task.id });
        }
        let at = task
            .due_time
            .as_deref()
            .map(format_time_for_display)
            .unwrap_or_default();
        tracing::info!(task_id = task.id, alarm_time, ?precision, "reminder armed");
        self.notices.notice(UserNotice::ReminderSet {
            task_id: task.id,
            at,
        });

        Ok(ArmOutcome::Armed {
            alarm_time,
            precision,
        })
    }

    /// Registers with the best precision the host grants, falling back to
    /// inexact when exact is refused.
    fn register(
        &self,
        task_id: TaskId,
        alarm_time: i64,
        payload: AlarmPayload,
    ) -> Result<Precision, AppError> {
        let wanted = self.host.capability().best_precision();
        let result = self
            .host
            .schedule_once(task_id, alarm_time, wanted, payload.clone());

        let precision = match result {
            Ok(()) => wanted,
            Err(HostError::PermissionDenied(reason)) if wanted == Precision::Exact => {
                tracing::warn!(task_id, %reason, "exact timer refused, retrying inexact");
                self.host
                    .schedule_once(task_id, alarm_time, Precision::Inexact, payload)
                    .map_err(|err| self.host_failure(task_id, err))?;
                Precision::Inexact
            }
            Err(err) => return Err(self.host_failure(task_id, err)),
        };

        if precision == Precision::Inexact {
            tracing::warn!(task_id, "reminder armed with inexact precision");
        }
        Ok(precision)
    }

    fn host_failure(&self, task_id: TaskId, err: HostError) -> AppError {
        tracing::error!(task_id, error = %err, "failed to set reminder");
        self.notices.notice(UserNotice::Failed {
            task_id,
            reason: err.to_string(),
        });
        AppError::host_unavailable(err.to_string())
    }

    fn lock_for(&self, task_id: TaskId) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(task_id).or_default())
    }

    /// Drops the table entry once nobody else holds or waits on it.
    fn release(&self, task_id: TaskId, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&task_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2)
        {
            locks.remove(&task_id);
        }
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::{ArmOutcome, ReminderScheduler, SkipReason, SyncAction};
    use crate::alarm::DEFAULT_LEAD_TIME;
    use crate::clock::{FixedClock, epoch_millis};
    use crate::host::{AlarmHost, ManualAlarmHost, Precision, TimerCapability};
    use crate::model::{Task, TaskStatus};
    use crate::notice::{CollectingNoticeSink, UserNotice};
    use crate::storage::{MemoryTaskStore, TaskRepository, TaskStore};
    use std::sync::Arc;
    use std::thread;
    use time::macros::datetime;

    struct Fixture {
        store: Arc<MemoryTaskStore>,
        host: Arc<ManualAlarmHost>,
        notices: Arc<CollectingNoticeSink>,
        scheduler: Arc<ReminderScheduler>,
    }

    fn fixture_with(capability: TimerCapability, tasks: Vec<Task>) -> Fixture {
        let clock = Arc::new(FixedClock::new(datetime!(2025-03-10 08:00 UTC)));
        let store = Arc::new(MemoryTaskStore::with_tasks(tasks));
        let host = Arc::new(ManualAlarmHost::new(Arc::clone(&clock)).with_capability(capability));
        let notices = Arc::new(CollectingNoticeSink::new());
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            host.clone(),
            clock,
            notices.clone(),
            DEFAULT_LEAD_TIME,
        ));
        Fixture {
            store,
            host,
            notices,
            scheduler,
        }
    }

    fn task(id: i64, due_time: &str) -> Task {
        Task {
            id,
            title: format!("task {id}"),
            description: Some("details".into()),
            status: TaskStatus::Pending,
            created_at: "2025-03-01T00:00:00Z".to_string(),
            completed_at: None,
            due_date: Some("2025-03-10".into()),
            due_time: Some(due_time.into()),
            has_reminder: true,
            alarm_time: None,
            category: "General".to_string(),
            priority: 2,
        }
    }

    #[test]
    fn arm_registers_and_persists() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        let expected = epoch_millis(datetime!(2025-03-10 08:59 UTC));

        let outcome = fx.scheduler.arm(&task(1, "09:00")).unwrap();

        assert_eq!(
            outcome,
            ArmOutcome::Armed {
                alarm_time: expected,
                precision: Precision::Exact
            }
        );
        let scheduled = fx.host.scheduled(1).unwrap();
        assert_eq!(scheduled.fire_at, expected);
        assert_eq!(scheduled.payload.title, "task 1");
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, Some(expected));
        assert_eq!(
            fx.notices.drain(),
            vec![UserNotice::ReminderSet {
                task_id: 1,
                at: "9:00 AM".into()
            }]
        );
    }

    #[test]
    fn reminder_off_never_arms() {
        let mut quiet = task(1, "09:00");
        quiet.has_reminder = false;
        quiet.alarm_time = Some(1);
        let fx = fixture_with(TimerCapability::Exact, vec![quiet.clone()]);

        let outcome = fx.scheduler.arm(&quiet).unwrap();

        assert_eq!(outcome, ArmOutcome::Skipped(SkipReason::ReminderOff));
        assert_eq!(fx.host.pending_count(), 0);
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, None);
    }

    #[test]
    fn completed_task_is_skipped() {
        let mut done = task(1, "09:00");
        done.status = TaskStatus::Completed;
        let fx = fixture_with(TimerCapability::Exact, vec![done.clone()]);

        assert_eq!(
            fx.scheduler.arm(&done).unwrap(),
            ArmOutcome::Skipped(SkipReason::Completed)
        );
        assert!(!fx.host.is_armed(1));
    }

    #[test]
    fn invalid_schedule_notifies_and_clears() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();
        fx.notices.drain();

        let err = fx.scheduler.arm(&task(1, "07:30")).unwrap_err();

        assert_eq!(err.code(), "invalid_schedule");
        assert!(!fx.host.is_armed(1));
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, None);
        assert!(matches!(
            fx.notices.drain().as_slice(),
            [UserNotice::InvalidSchedule { task_id: 1, .. }]
        ));
    }

    #[test]
    fn arming_twice_keeps_one_trigger_with_latest_time() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();
        fx.scheduler.arm(&task(1, "10:00")).unwrap();

        let latest = epoch_millis(datetime!(2025-03-10 09:59 UTC));
        assert_eq!(fx.host.pending_count(), 1);
        assert_eq!(fx.host.scheduled(1).unwrap().fire_at, latest);
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, Some(latest));
    }

    #[test]
    fn cancel_is_idempotent() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();

        fx.scheduler.cancel(1).unwrap();
        fx.scheduler.cancel(1).unwrap();
        fx.scheduler.cancel(99).unwrap();

        assert_eq!(fx.host.pending_count(), 0);
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, None);
    }

    #[test]
    fn arming_unknown_task_leaves_no_trigger() {
        let fx = fixture_with(TimerCapability::Exact, Vec::new());

        let err = fx.scheduler.arm(&task(5, "09:00")).unwrap_err();

        assert_eq!(err.code(), "invalid_input");
        assert!(!fx.host.is_armed(5));
    }

    #[test]
    fn denied_capability_degrades_to_inexact() {
        let fx = fixture_with(TimerCapability::Denied, vec![task(1, "09:00")]);

        let outcome = fx.scheduler.arm(&task(1, "09:00")).unwrap();

        assert!(matches!(
            outcome,
            ArmOutcome::Armed {
                precision: Precision::Inexact,
                ..
            }
        ));
        assert_eq!(fx.host.scheduled(1).unwrap().precision, Precision::Inexact);
        let notices = fx.notices.drain();
        assert!(notices.contains(&UserNotice::PrecisionDegraded { task_id: 1 }));
        assert!(matches!(notices.last(), Some(UserNotice::ReminderSet { .. })));
    }

    #[test]
    fn failed_persist_sends_no_precision_notice() {
        let fx = fixture_with(TimerCapability::Denied, Vec::new());

        let err = fx.scheduler.arm(&task(7, "09:00")).unwrap_err();

        assert_eq!(err.code(), "invalid_input");
        assert!(!fx.host.is_armed(7));
        assert!(fx.notices.drain().is_empty());
    }

    #[test]
    fn cancel_drops_idle_lock_entries() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00"), task(2, "09:30")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();
        fx.scheduler.arm(&task(2, "09:30")).unwrap();
        assert_eq!(fx.scheduler.lock_table_len(), 2);

        fx.scheduler.cancel(1).unwrap();
        fx.scheduler.cancel(2).unwrap();
        fx.scheduler.cancel(3).unwrap();

        assert_eq!(fx.scheduler.lock_table_len(), 0);
    }

    #[test]
    fn refused_exact_registration_retries_inexact() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        fx.host.set_reject_exact(true);

        let outcome = fx.scheduler.arm(&task(1, "09:00")).unwrap();

        assert!(matches!(
            outcome,
            ArmOutcome::Armed {
                precision: Precision::Inexact,
                ..
            }
        ));
        assert!(fx.host.is_armed(1));
    }

    #[test]
    fn unavailable_host_fails_single_task() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00"), task(2, "09:30")]);
        fx.host.set_unavailable(true);

        let err = fx.scheduler.arm(&task(1, "09:00")).unwrap_err();
        assert_eq!(err.code(), "host_unavailable");
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, None);

        fx.host.set_unavailable(false);
        assert!(fx.scheduler.arm(&task(2, "09:30")).is_ok());
    }

    #[test]
    fn resync_arms_time_written_elsewhere() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        let stored = epoch_millis(datetime!(2025-03-10 08:59 UTC));
        fx.store.record_alarm(1, Some(stored)).unwrap();

        assert_eq!(fx.scheduler.resync(1).unwrap(), SyncAction::Armed(stored));
        assert_eq!(fx.host.scheduled(1).unwrap().fire_at, stored);
        assert_eq!(fx.scheduler.resync(1).unwrap(), SyncAction::Unchanged);
    }

    #[test]
    fn resync_follows_edited_due_time() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();

        let latest = epoch_millis(datetime!(2025-03-10 10:59 UTC));
        let mut edited = fx.store.get_task(1).unwrap().unwrap();
        edited.due_time = Some("11:00".into());
        edited.alarm_time = Some(latest);
        fx.store.update(&edited).unwrap();

        assert_eq!(fx.scheduler.resync(1).unwrap(), SyncAction::Armed(latest));
        assert_eq!(fx.host.scheduled(1).unwrap().fire_at, latest);
        assert_eq!(fx.host.pending_count(), 1);
    }

    #[test]
    fn resync_cancels_withdrawn_reminders() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00"), task(2, "09:30")]);
        fx.scheduler.arm(&task(1, "09:00")).unwrap();
        fx.scheduler.arm(&task(2, "09:30")).unwrap();

        fx.store.record_alarm(1, None).unwrap();
        fx.store.delete(2).unwrap();

        assert_eq!(fx.scheduler.resync(1).unwrap(), SyncAction::Cancelled);
        assert_eq!(fx.scheduler.resync(2).unwrap(), SyncAction::Cancelled);
        assert_eq!(fx.host.pending_count(), 0);
    }

    #[test]
    fn resync_leaves_due_trigger_alone() {
        let fx = fixture_with(TimerCapability::Exact, vec![task(1, "09:00")]);
        let past = epoch_millis(datetime!(2025-03-10 07:00 UTC));
        fx.store.record_alarm(1, Some(past)).unwrap();

        assert_eq!(fx.scheduler.resync(1).unwrap(), SyncAction::Unchanged);
        assert!(!fx.host.is_armed(1));
        assert_eq!(fx.store.get_task(1).unwrap().unwrap().alarm_time, Some(past));
    }

    #[test]
    fn concurrent_rearms_leave_one_trigger_per_task() {
        let tasks: Vec<Task> = (1..=4).map(|id| task(id, "09:00")).collect();
        let fx = fixture_with(TimerCapability::Exact, tasks);

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let scheduler = Arc::clone(&fx.scheduler);
                thread::spawn(move || {
                    let id = (n % 4) + 1;
                    scheduler.rearm(&task(id, "09:00")).unwrap();
                    scheduler.cancel(id).unwrap();
                    scheduler.rearm(&task(id, "11:00")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let latest = epoch_millis(datetime!(2025-03-10 10:59 UTC));
        assert_eq!(fx.host.pending_count(), 4);
        for id in 1..=4 {
            assert_eq!(fx.host.scheduled(id).unwrap().fire_at, latest);
        }
    }
}

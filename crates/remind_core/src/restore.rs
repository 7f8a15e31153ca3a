//! Startup sweep: host triggers do not survive a restart, so every
//! still-future reminder in the store is armed again. Long-lived processes
//! then resync periodically to pick up rows changed by other processes.

use crate::alarm::is_overdue;
use crate::error::AppError;
use crate::model::TaskId;
use crate::scheduler::{ArmOutcome, ReminderScheduler, SyncAction};
use std::collections::BTreeSet;
use crate::storage::TaskStore;

#[derive(Debug)]
pub struct RestoreFailure {
    pub task_id: TaskId,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub rearmed: Vec<TaskId>,
    pub skipped_overdue: Vec<TaskId>,
    pub failures: Vec<RestoreFailure>,
    /// Set when the store could not be read at all; the sweep then arms
    /// nothing but still returns normally.
    pub load_error: Option<AppError>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.load_error.is_none()
    }
}

pub fn run_restoration_sweep(store: &dyn TaskStore, scheduler: &ReminderScheduler) -> SweepReport {
    let mut report = SweepReport::default();

    let tasks = match store.pending_with_reminder() {
        Ok(tasks) => tasks,
        Err(err) => {
            tracing::error!(error = %err, "restoration sweep could not read tasks");
            report.load_error = Some(err);
            return report;
        }
    };

    let now = scheduler.clock().now();
    for task in tasks {
        if is_overdue(&task, now) {
            tracing::debug!(task_id = task.id, "skipping overdue reminder");
            report.skipped_overdue.push(task.id);
            continue;
        }

        match scheduler.arm(&task) {
            Ok(ArmOutcome::Armed { .. }) => report.rearmed.push(task.id),
            Ok(ArmOutcome::Skipped(reason)) => {
                tracing::debug!(task_id = task.id, ?reason, "reminder not restored");
            }
            Err(error) => {
                tracing::warn!(task_id = task.id, %error, "reminder not restored");
                report.failures.push(RestoreFailure {
                    task_id: task.id,
                    error,
                });
            }
        }
    }

    tracing::info!(
        rearmed = report.rearmed.len(),
        skipped = report.skipped_overdue.len(),
        failed = report.failures.len(),
        "restoration sweep finished"
    );
    report
}

#[derive(Debug, Default)]
pub struct ResyncReport {
    pub armed: Vec<TaskId>,
    pub cancelled: Vec<TaskId>,
    pub failures: Vec<RestoreFailure>,
    pub load_error: Option<AppError>,
}

impl ResyncReport {
    pub fn is_quiet(&self) -> bool {
        self.armed.is_empty()
            && self.cancelled.is_empty()
            && self.failures.is_empty()
            && self.load_error.is_none()
    }
}

/// Brings the host's triggers in line with the store: rows with reminders
/// plus every id the host currently has armed.
pub fn resync_with_store(store: &dyn TaskStore, scheduler: &ReminderScheduler) -> ResyncReport {
    let mut report = ResyncReport::default();

    let mut ids: BTreeSet<TaskId> = scheduler.armed_ids().into_iter().collect();
    match store.pending_with_reminder() {
        Ok(tasks) => ids.extend(tasks.iter().map(|task| task.id)),
        Err(err) => {
            tracing::warn!(error = %err, "resync could not read tasks");
            report.load_error = Some(err);
            return report;
        }
    }

    for task_id in ids {
        match scheduler.resync(task_id) {
            Ok(SyncAction::Unchanged) => {}
            Ok(SyncAction::Armed(_)) => report.armed.push(task_id),
            Ok(SyncAction::Cancelled) => report.cancelled.push(task_id),
            Err(error) => {
                tracing::warn!(task_id, %error, "reminder not resynced");
                report.failures.push(RestoreFailure { task_id, error });
            }
        }
    }

    if !report.is_quiet() {
        tracing::info!(
            armed = report.armed.len(),
            cancelled = report.cancelled.len(),
            failed = report.failures.len(),
            "resynced reminders from store"
        );
    }
    report
}

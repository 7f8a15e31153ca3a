//! One-shot wake timers keyed by task id.
//!
//! A host owns the registry of outstanding triggers and invokes the
//! [`FireListener`] it was built with when one elapses. Hosts never
//! deduplicate on their own behalf beyond replacing an existing entry for the
//! same id; the scheduler always cancels before it registers.

use crate::model::TaskId;
use thiserror::Error;

mod deferred;
mod manual;
mod tokio_host;

pub use deferred::DeferredAlarmHost;
pub use manual::{ManualAlarmHost, ScheduledAlarm};
pub use tokio_host::TokioAlarmHost;

/// What the host allows the process to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCapability {
    Exact,
    /// The host only offers coalesced wake-ups.
    Inexact,
    /// Exact wake-ups exist but the user or policy has not granted them.
    Denied,
}

impl TimerCapability {
    pub fn best_precision(self) -> Precision {
        match self {
            Self::Exact => Precision::Exact,
            Self::Inexact | Self::Denied => Precision::Inexact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Exact,
    Inexact,
}

/// Snapshot carried by a trigger and handed back on fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmPayload {
    pub title: String,
    pub description: Option<String>,
    /// Epoch milliseconds the trigger was armed for.
    pub fire_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("exact timer permission denied: {0}")]
    PermissionDenied(String),
    #[error("timer service unavailable: {0}")]
    Unavailable(String),
}

pub trait FireListener: Send + Sync {
    fn on_fire(&self, task_id: TaskId, payload: AlarmPayload);
}

pub trait AlarmHost: Send + Sync {
    fn capability(&self) -> TimerCapability;

    /// Registers a trigger at `fire_at` (epoch ms), replacing any trigger
    /// already registered for `task_id`.
    fn schedule_once(
        &self,
        task_id: TaskId,
        fire_at: i64,
        precision: Precision,
        payload: AlarmPayload,
    ) -> Result<(), HostError>;

    /// Removes the trigger for `task_id`. Unknown ids are not an error.
    fn cancel(&self, task_id: TaskId) -> Result<(), HostError>;

    fn is_armed(&self, task_id: TaskId) -> bool;

    /// Fire time the outstanding trigger was requested for, before any
    /// coalescing the host applies.
    fn registered_at(&self, task_id: TaskId) -> Option<i64>;

    fn armed_ids(&self) -> Vec<TaskId>;
}

#[cfg(test)]
mod tests {
    use super::{Precision, TimerCapability};

    #[test]
    fn only_exact_capability_allows_exact_precision() {
        assert_eq!(TimerCapability::Exact.best_precision(), Precision::Exact);
        assert_eq!(TimerCapability::Inexact.best_precision(), Precision::Inexact);
        assert_eq!(TimerCapability::Denied.best_precision(), Precision::Inexact);
    }
}

use crate::host::{AlarmHost, AlarmPayload, HostError, Precision, TimerCapability};
use crate::model::TaskId;

/// Host for short-lived processes: accepts every registration without
/// arming anything. The persisted `alarm_time` is picked up by a running
/// `watch` on its next resync, or by the next restoration sweep.
pub struct DeferredAlarmHost {
    capability: TimerCapability,
}

impl DeferredAlarmHost {
    pub fn new(capability: TimerCapability) -> Self {
        Self { capability }
    }
}

impl AlarmHost for DeferredAlarmHost {
    fn capability(&self) -> TimerCapability {
        self.capability
    }

    fn schedule_once(
        &self,
        task_id: TaskId,
        fire_at: i64,
        precision: Precision,
        _payload: AlarmPayload,
    ) -> Result<(), HostError> {
        tracing::debug!(task_id, fire_at, ?precision, "trigger deferred to next restoration sweep");
        Ok(())
    }

    fn cancel(&self, _task_id: TaskId) -> Result<(), HostError> {
        Ok(())
    }

    fn is_armed(&self, _task_id: TaskId) -> bool {
        false
    }

    fn registered_at(&self, _task_id: TaskId) -> Option<i64> {
        None
    }

    fn armed_ids(&self) -> Vec<TaskId> {
        Vec::new()
    }
}

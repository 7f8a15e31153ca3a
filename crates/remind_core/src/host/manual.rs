use crate::clock::{Clock, FixedClock};
use crate::host::{AlarmHost, AlarmPayload, FireListener, HostError, Precision, TimerCapability};
use crate::model::TaskId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAlarm {
    pub fire_at: i64,
    pub precision: Precision,
    pub payload: AlarmPayload,
}

struct State {
    capability: TimerCapability,
    unavailable: bool,
    reject_exact: bool,
    timers: BTreeMap<TaskId, ScheduledAlarm>,
}

/// In-memory host driven by a [`FixedClock`]. Triggers fire only when
/// [`advance`](Self::advance) moves the clock past them, on the calling
/// thread.
pub struct ManualAlarmHost {
    clock: Arc<FixedClock>,
    listener: Mutex<Option<Arc<dyn FireListener>>>,
    state: Mutex<State>,
}

impl ManualAlarmHost {
    pub fn new(clock: Arc<FixedClock>) -> Self {
        Self {
            clock,
            listener: Mutex::new(None),
            state: Mutex::new(State {
                capability: TimerCapability::Exact,
                unavailable: false,
                reject_exact: false,
                timers: BTreeMap::new(),
            }),
        }
    }

    pub fn with_capability(self, capability: TimerCapability) -> Self {
        self.lock_state().capability = capability;
        self
    }

    pub fn set_listener(&self, listener: Arc<dyn FireListener>) {
        *self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(listener);
    }

    /// Simulates a host that advertises exact timers but refuses them at
    /// registration time.
    pub fn set_reject_exact(&self, reject: bool) {
        self.lock_state().reject_exact = reject;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_state().unavailable = unavailable;
    }

    pub fn scheduled(&self, task_id: TaskId) -> Option<ScheduledAlarm> {
        self.lock_state().timers.get(&task_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().timers.len()
    }

    /// Moves the virtual clock forward and fires every trigger now due, in
    /// fire-time order. Returns the ids that fired.
    pub fn advance(&self, by: Duration) -> Vec<TaskId> {
        let now = self.clock.advance(by);
        let now_millis = crate::clock::epoch_millis(now);

        let mut due: Vec<(TaskId, ScheduledAlarm)> = {
            let mut state = self.lock_state();
            let ids: Vec<TaskId> = state
                .timers
                .iter()
                .filter(|(_, alarm)| alarm.fire_at <= now_millis)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.timers.remove(&id).map(|alarm| (id, alarm)))
                .collect()
        };
        due.sort_by_key(|(id, alarm)| (alarm.fire_at, *id));

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let mut fired = Vec::with_capacity(due.len());
        for (task_id, alarm) in due {
            if let Some(listener) = listener.as_ref() {
                listener.on_fire(task_id, alarm.payload);
            }
            fired.push(task_id);
        }
        fired
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AlarmHost for ManualAlarmHost {
    fn capability(&self) -> TimerCapability {
        self.lock_state().capability
    }

    fn schedule_once(
        &self,
        task_id: TaskId,
        fire_at: i64,
        precision: Precision,
        payload: AlarmPayload,
    ) -> Result<(), HostError> {
        let mut state = self.lock_state();
        if state.unavailable {
            return Err(HostError::Unavailable("manual host offline".into()));
        }
        if precision == Precision::Exact
            && (state.reject_exact || state.capability != TimerCapability::Exact)
        {
            return Err(HostError::PermissionDenied("exact timers not granted".into()));
        }
        if fire_at <= self.clock.now_millis() {
            tracing::debug!(task_id, fire_at, "registering trigger already due");
        }

        state.timers.insert(
            task_id,
            ScheduledAlarm {
                fire_at,
                precision,
                payload,
            },
        );
        Ok(())
    }

    fn cancel(&self, task_id: TaskId) -> Result<(), HostError> {
        let mut state = self.lock_state();
        if state.unavailable {
            return Err(HostError::Unavailable("manual host offline".into()));
        }
        state.timers.remove(&task_id);
        Ok(())
    }

    fn is_armed(&self, task_id: TaskId) -> bool {
        self.lock_state().timers.contains_key(&task_id)
    }

    fn registered_at(&self, task_id: TaskId) -> Option<i64> {
        self.lock_state().timers.get(&task_id).map(|alarm| alarm.fire_at)
    }

    fn armed_ids(&self) -> Vec<TaskId> {
        self.lock_state().timers.keys().copied().collect()
    }
}

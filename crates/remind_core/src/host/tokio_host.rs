use crate::clock::Clock;
use crate::host::{AlarmHost, AlarmPayload, FireListener, HostError, Precision, TimerCapability};
use crate::model::TaskId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Inexact triggers are coalesced onto minute boundaries.
const INEXACT_WINDOW_MILLIS: i64 = 60_000;

/// Longest single sleep before the wall clock is consulted again. Tokio
/// timers stand still while the machine is suspended.
const WALL_CLOCK_CHECK_MILLIS: i64 = 30_000;

struct ArmedTimer {
    generation: u64,
    requested: i64,
    fire_at: i64,
    handle: AbortHandle,
}

type Registry = Arc<Mutex<HashMap<TaskId, ArmedTimer>>>;

/// Real timers: one sleeping tokio task per armed reminder.
pub struct TokioAlarmHost {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    capability: TimerCapability,
    listener: Arc<dyn FireListener>,
    timers: Registry,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl TokioAlarmHost {
    pub fn new(
        runtime: Handle,
        clock: Arc<dyn Clock>,
        capability: TimerCapability,
        listener: Arc<dyn FireListener>,
    ) -> Self {
        Self {
            runtime,
            clock,
            capability,
            listener,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Epoch ms the trigger for `task_id` will actually fire at.
    pub fn armed_at(&self, task_id: TaskId) -> Option<i64> {
        lock(&self.timers).get(&task_id).map(|timer| timer.fire_at)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Aborts every outstanding trigger and refuses further registrations.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut timers = lock(&self.timers);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

impl AlarmHost for TokioAlarmHost {
    fn capability(&self) -> TimerCapability {
        self.capability
    }

    fn schedule_once(
        &self,
        task_id: TaskId,
        fire_at: i64,
        precision: Precision,
        payload: AlarmPayload,
    ) -> Result<(), HostError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("timer host is shut down".into()));
        }
        if precision == Precision::Exact && self.capability != TimerCapability::Exact {
            return Err(HostError::PermissionDenied(
                "exact timers are disabled".into(),
            ));
        }

        let requested = fire_at;
        let fire_at = match precision {
            Precision::Exact => fire_at,
            Precision::Inexact => coalesce(fire_at),
        };
        let delay_millis = fire_at.saturating_sub(self.clock.now_millis()).max(0);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        // Held across spawn so a zero-delay timer cannot look itself up
        // before it is registered.
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.remove(&task_id) {
            previous.handle.abort();
        }

        let registry = Arc::clone(&self.timers);
        let listener = Arc::clone(&self.listener);
        let clock = Arc::clone(&self.clock);
        let join = self.runtime.spawn(async move {
            sleep_until_wall(clock.as_ref(), fire_at).await;

            let current = {
                let mut timers = lock(&registry);
                match timers.get(&task_id) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&task_id);
                        true
                    }
                    _ => false,
                }
            };
            if !current {
                return;
            }

            tracing::info!(task_id, fire_at, "reminder trigger elapsed");
            let fired = tokio::task::spawn_blocking(move || listener.on_fire(task_id, payload));
            if let Err(err) = fired.await {
                tracing::error!(task_id, error = %err, "fire handler panicked");
            }
        });

        timers.insert(
            task_id,
            ArmedTimer {
                generation,
                requested,
                fire_at,
                handle: join.abort_handle(),
            },
        );
        tracing::debug!(task_id, fire_at, ?precision, delay_millis, "trigger registered");
        Ok(())
    }

    fn cancel(&self, task_id: TaskId) -> Result<(), HostError> {
        if let Some(timer) = lock(&self.timers).remove(&task_id) {
            timer.handle.abort();
            tracing::debug!(task_id, "trigger cancelled");
        }
        Ok(())
    }

    fn is_armed(&self, task_id: TaskId) -> bool {
        lock(&self.timers).contains_key(&task_id)
    }

    fn registered_at(&self, task_id: TaskId) -> Option<i64> {
        lock(&self.timers).get(&task_id).map(|timer| timer.requested)
    }

    fn armed_ids(&self) -> Vec<TaskId> {
        lock(&self.timers).keys().copied().collect()
    }
}

async fn sleep_until_wall(clock: &dyn Clock, fire_at: i64) {
    loop {
        let remaining = fire_at.saturating_sub(clock.now_millis());
        if remaining <= 0 {
            return;
        }
        let step = remaining.min(WALL_CLOCK_CHECK_MILLIS);
        tokio::time::sleep(std::time::Duration::from_millis(step as u64)).await;
    }
}

fn coalesce(fire_at: i64) -> i64 {
    let remainder = fire_at.rem_euclid(INEXACT_WINDOW_MILLIS);
    if remainder == 0 {
        fire_at
    } else {
        fire_at + (INEXACT_WINDOW_MILLIS - remainder)
    }
}

fn lock(timers: &Registry) -> MutexGuard<'_, HashMap<TaskId, ArmedTimer>> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Wall-clock source for everything that compares against "now".
//!
//! The offset of the returned `OffsetDateTime` is the user's local offset;
//! due dates and times are interpreted in it.

use std::sync::Mutex;
use time::{Duration, OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn now_millis(&self) -> i64 {
        epoch_millis(self.now())
    }
}

pub fn epoch_millis(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_epoch_millis(millis: i64, offset: UtcOffset) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .map(|instant| instant.to_offset(offset))
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    /// Captures the local offset once; the offset cannot be determined
    /// reliably after threads have been spawned on some platforms.
    pub fn local() -> Self {
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    pub fn with_offset(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Manually driven clock for tests and the in-memory alarm host.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) -> OffsetDateTime {
        let mut guard = self.lock();
        *guard += by;
        *guard
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OffsetDateTime> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FixedClock, SystemClock, epoch_millis, from_epoch_millis};
    use time::macros::{datetime, offset};
    use time::{Duration, UtcOffset};

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(datetime!(2025-03-10 08:00 UTC));
        clock.advance(Duration::minutes(59));

        assert_eq!(clock.now(), datetime!(2025-03-10 08:59 UTC));
        assert_eq!(clock.now_millis(), 1_741_597_140_000);
    }

    #[test]
    fn millis_round_trip_keeps_offset() {
        let instant = datetime!(2025-03-10 08:59 +02:00);
        let millis = epoch_millis(instant);
        let restored = from_epoch_millis(millis, offset!(+02:00)).unwrap();

        assert_eq!(restored, instant);
        assert_eq!(restored.offset(), offset!(+02:00));
    }

    #[test]
    fn system_clock_uses_configured_offset() {
        let clock = SystemClock::with_offset(UtcOffset::UTC);
        assert_eq!(clock.now().offset(), UtcOffset::UTC);
    }
}

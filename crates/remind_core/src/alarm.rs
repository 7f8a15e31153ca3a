//! Fire-time arithmetic for reminders.

use crate::clock::epoch_millis;
use crate::error::AppError;
use crate::model::Task;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};

/// Due time assumed when a task only carries a date.
const END_OF_DAY: Time = time::macros::time!(23:59);

pub const DEFAULT_LEAD_TIME: Duration = Duration::minutes(1);

/// Epoch milliseconds at which the reminder for `due_date due_time` fires.
///
/// The due instant is read in `now`'s offset. Fails when either part is
/// missing or malformed, or when the lead-adjusted instant is not strictly
/// after `now`.
pub fn calculate_alarm_time(
    due_date: Option<&str>,
    due_time: Option<&str>,
    lead_time: Duration,
    now: OffsetDateTime,
) -> Result<i64, AppError> {
    let (date, time) = match (non_blank(due_date), non_blank(due_time)) {
        (Some(date), Some(time)) => (date, time),
        _ => {
            tracing::debug!(?due_date, ?due_time, "missing due date or time");
            return Err(AppError::invalid_schedule("due date and time are required"));
        }
    };

    let due = parse_due(date, time)?.assume_offset(now.offset());
    let candidate = due
        .checked_sub(lead_time)
        .ok_or_else(|| AppError::invalid_schedule(format!("due date '{date}' is out of range")))?;
    tracing::debug!(%due, %candidate, %now, "computed reminder time");

    if candidate <= now {
        return Err(AppError::invalid_schedule(format!(
            "reminder time {} is not in the future",
            format_instant(candidate)
        )));
    }

    Ok(epoch_millis(candidate))
}

/// Convenience wrapper reading the due fields off a task.
pub fn alarm_time_for(task: &Task, lead_time: Duration, now: OffsetDateTime) -> Result<i64, AppError> {
    calculate_alarm_time(
        task.due_date.as_deref(),
        task.due_time.as_deref(),
        lead_time,
        now,
    )
}

/// A pending task whose due instant has passed. Date-only tasks are due at
/// the end of their day; malformed values are never overdue.
pub fn is_overdue(task: &Task, now: OffsetDateTime) -> bool {
    if task.is_completed() {
        return false;
    }
    let Some(date) = non_blank(task.due_date.as_deref()) else {
        return false;
    };

    let Ok(date) = parse_date(date) else {
        return false;
    };
    let time = match non_blank(task.due_time.as_deref()) {
        Some(raw) => match parse_time(raw) {
            Ok(time) => time,
            Err(_) => return false,
        },
        None => END_OF_DAY,
    };

    PrimitiveDateTime::new(date, time).assume_offset(now.offset()) < now
}

/// `"13:30"` → `"1:30 PM"`. Unparsable input comes back unchanged.
pub fn format_time_for_display(raw: &str) -> String {
    let Ok(time) = parse_time(raw.trim()) else {
        return raw.to_string();
    };

    let (hour, period) = match time.hour() {
        0 => (12, "AM"),
        hour @ 1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        hour => (hour - 12, "PM"),
    };
    format!("{}:{:02} {}", hour, time.minute(), period)
}

pub fn format_instant(instant: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    instant
        .format(format)
        .unwrap_or_else(|_| instant.unix_timestamp().to_string())
}

pub fn validate_due_date(raw: &str) -> Result<(), AppError> {
    parse_date(raw.trim())
        .map(|_| ())
        .map_err(|_| AppError::invalid_input("due date must be YYYY-MM-DD"))
}

pub fn validate_due_time(raw: &str) -> Result<(), AppError> {
    parse_time(raw.trim())
        .map(|_| ())
        .map_err(|_| AppError::invalid_input("due time must be HH:MM"))
}

fn parse_due(date: &str, time: &str) -> Result<PrimitiveDateTime, AppError> {
    let date = parse_date(date)
        .map_err(|_| AppError::invalid_schedule(format!("invalid due date '{date}'")))?;
    let time = parse_time(time)
        .map_err(|_| AppError::invalid_schedule(format!("invalid due time '{time}'")))?;
    Ok(PrimitiveDateTime::new(date, time))
}

fn parse_date(raw: &str) -> Result<Date, time::error::Parse> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
}

fn parse_time(raw: &str) -> Result<Time, time::error::Parse> {
    Time::parse(raw, format_description!("[hour]:[minute]"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_LEAD_TIME, calculate_alarm_time, format_time_for_display, is_overdue,
    };
    use crate::clock::epoch_millis;
    use crate::model::{Task, TaskStatus};
    use time::Duration;
    use time::macros::datetime;

    fn task(due_date: Option<&str>, due_time: Option<&str>) -> Task {
        Task {
            id: 1,
            title: "demo".to_string(),
            description: None,
            status: TaskStatus::Pending,
            created_at: "2025-03-01T00:00:00Z".to_string(),
            completed_at: None,
            due_date: due_date.map(str::to_string),
            due_time: due_time.map(str::to_string),
            has_reminder: true,
            alarm_time: None,
            category: "General".to_string(),
            priority: 2,
        }
    }

    #[test]
    fn fires_one_minute_before_due() {
        let now = datetime!(2025-03-10 08:00 UTC);
        let fire = calculate_alarm_time(Some("2025-03-10"), Some("09:00"), DEFAULT_LEAD_TIME, now)
            .unwrap();

        assert_eq!(fire, epoch_millis(datetime!(2025-03-10 08:59:00 UTC)));
    }

    #[test]
    fn rejects_fire_time_before_now() {
        let now = datetime!(2025-03-10 09:00:30 UTC);
        let err = calculate_alarm_time(Some("2025-03-10"), Some("09:00"), DEFAULT_LEAD_TIME, now)
            .unwrap_err();

        assert_eq!(err.code(), "invalid_schedule");
    }

    #[test]
    fn rejects_fire_time_equal_to_now() {
        let now = datetime!(2025-03-10 08:59 UTC);
        let result =
            calculate_alarm_time(Some("2025-03-10"), Some("09:00"), DEFAULT_LEAD_TIME, now);

        assert!(result.is_err());
    }

    #[test]
    fn never_returns_a_past_timestamp() {
        let now = datetime!(2025-03-10 08:58:59 UTC);
        for minutes in 0..5 {
            let lead = Duration::minutes(minutes);
            if let Ok(fire) = calculate_alarm_time(Some("2025-03-10"), Some("09:00"), lead, now) {
                assert!(fire > epoch_millis(now));
            }
        }
    }

    #[test]
    fn rejects_missing_or_malformed_parts() {
        let now = datetime!(2025-03-01 00:00 UTC);
        let cases = [
            (None, Some("09:00")),
            (Some("2025-03-10"), None),
            (Some("  "), Some("09:00")),
            (Some("10/03/2025"), Some("09:00")),
            (Some("2025-03-10"), Some("9am")),
            (Some("2025-02-30"), Some("09:00")),
            (Some("2025-03-10"), Some("24:00")),
        ];

        for (date, time) in cases {
            let err = calculate_alarm_time(date, time, DEFAULT_LEAD_TIME, now).unwrap_err();
            assert_eq!(err.code(), "invalid_schedule", "{date:?} {time:?}");
        }
    }

    #[test]
    fn earliest_representable_date_is_rejected() {
        let now = datetime!(2025-03-10 08:00 UTC);
        let err = calculate_alarm_time(Some("-9999-01-01"), Some("00:00"), DEFAULT_LEAD_TIME, now)
            .unwrap_err();

        assert_eq!(err.code(), "invalid_schedule");
    }

    #[test]
    fn due_time_is_read_in_clock_offset() {
        let now = datetime!(2025-03-10 05:00 +02:00);
        let fire = calculate_alarm_time(Some("2025-03-10"), Some("09:00"), DEFAULT_LEAD_TIME, now)
            .unwrap();

        assert_eq!(fire, epoch_millis(datetime!(2025-03-10 06:59 UTC)));
    }

    #[test]
    fn overdue_uses_end_of_day_without_time() {
        let date_only = task(Some("2025-03-10"), None);

        assert!(!is_overdue(&date_only, datetime!(2025-03-10 23:58 UTC)));
        assert!(is_overdue(&date_only, datetime!(2025-03-11 00:00 UTC)));
    }

    #[test]
    fn overdue_ignores_completed_and_malformed() {
        let mut done = task(Some("2025-03-01"), Some("09:00"));
        done.status = TaskStatus::Completed;
        let garbage = task(Some("someday"), Some("09:00"));
        let now = datetime!(2025-03-10 00:00 UTC);

        assert!(!is_overdue(&done, now));
        assert!(!is_overdue(&garbage, now));
        assert!(!is_overdue(&task(None, None), now));
        assert!(is_overdue(&task(Some("2025-03-01"), Some("09:00")), now));
    }

    #[test]
    fn display_uses_twelve_hour_clock() {
        assert_eq!(format_time_for_display("09:00"), "9:00 AM");
        assert_eq!(format_time_for_display("00:05"), "12:05 AM");
        assert_eq!(format_time_for_display("12:00"), "12:00 PM");
        assert_eq!(format_time_for_display("13:30"), "1:30 PM");
        assert_eq!(format_time_for_display("later"), "later");
    }
}

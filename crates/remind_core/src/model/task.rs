use serde::{Deserialize, Deserializer, Serialize};

pub type TaskId = i64;

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_PRIORITY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub due_time: Option<String>,
    #[serde(default)]
    pub has_reminder: bool,
    /// Epoch milliseconds of the armed reminder. Older stores wrote `0` for
    /// "none"; that reads back as `None`.
    #[serde(default, deserialize_with = "deserialize_alarm_time")]
    pub alarm_time: Option<i64>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn has_due_date(&self) -> bool {
        has_text(self.due_date.as_deref())
    }

    pub fn has_due_time(&self) -> bool {
        has_text(self.due_time.as_deref())
    }

    /// `YYYY-MM-DD HH:MM` when both parts are set, the bare date otherwise.
    pub fn full_due(&self) -> Option<String> {
        match (self.due_date.as_deref(), self.due_time.as_deref()) {
            (Some(date), Some(time)) if has_text(Some(date)) && has_text(Some(time)) => {
                Some(format!("{date} {time}"))
            }
            (Some(date), _) if has_text(Some(date)) => Some(date.to_string()),
            _ => None,
        }
    }

    pub fn priority_label(&self) -> &'static str {
        match self.priority {
            1 => "high",
            3 => "low",
            _ => "medium",
        }
    }
}

/// Fields supplied when creating a task; the store assigns id and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub due_time: Option<String>,
    pub has_reminder: bool,
    pub category: Option<String>,
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|text| !text.trim().is_empty())
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn deserialize_alarm_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.filter(|value| *value > 0))
}

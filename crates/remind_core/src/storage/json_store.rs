use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId};
use crate::storage::{TaskRepository, TaskStore, awaiting_reminder, build_task};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const SCHEMA_VERSION: u32 = 1;
const STORE_FILE_NAME: &str = "tasks.json";
const STORE_ENV_VAR: &str = "REMIND_STORE_PATH";

#[derive(Debug, Serialize, Deserialize)]
struct StoredTasks {
    schema_version: u32,
    #[serde(default)]
    next_id: Option<TaskId>,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub next_id: TaskId,
    pub tasks: Vec<Task>,
}

impl TaskState {
    fn empty() -> Self {
        Self {
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

pub fn store_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    let base = dirs::config_dir()
        .ok_or_else(|| AppError::invalid_data("config directory is not available"))?;
    Ok(base.join("remind").join(STORE_FILE_NAME))
}

pub fn load_state(path: &Path) -> Result<TaskState, AppError> {
    if !path.exists() {
        return Ok(TaskState::empty());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(TaskState::empty());
    }
    let stored: StoredTasks =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    let max_id = stored.tasks.iter().map(|task| task.id).max().unwrap_or(0);
    let next_id = stored.next_id.unwrap_or(0).max(max_id + 1);

    Ok(TaskState {
        next_id,
        tasks: stored.tasks,
    })
}

pub fn save_state(path: &Path, state: &TaskState) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let stored = StoredTasks {
        schema_version: SCHEMA_VERSION,
        next_id: Some(state.next_id),
        tasks: state.tasks.to_vec(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&staging, permissions)?;
    }

    std::fs::rename(&staging, path)?;
    Ok(())
}

/// File-backed store. Every mutation is a load-modify-save cycle under one
/// lock so fire callbacks and user edits do not overwrite each other.
pub struct JsonTaskStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn modify<T>(&self, apply: impl FnOnce(&mut TaskState) -> Result<T, AppError>) -> Result<T, AppError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        let result = apply(&mut state)?;
        save_state(&self.path, &state)?;
        Ok(result)
    }
}

impl TaskStore for JsonTaskStore {
    fn pending_with_reminder(&self) -> Result<Vec<Task>, AppError> {
        let _guard = self.lock();
        Ok(load_state(&self.path)?
            .tasks
            .into_iter()
            .filter(awaiting_reminder)
            .collect())
    }

    fn get_task(&self, id: TaskId) -> Result<Option<Task>, AppError> {
        let _guard = self.lock();
        Ok(load_state(&self.path)?
            .tasks
            .into_iter()
            .find(|task| task.id == id))
    }

    fn record_alarm(&self, id: TaskId, alarm_time: Option<i64>) -> Result<bool, AppError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        let Some(task) = state.tasks.iter_mut().find(|task| task.id == id) else {
            return Ok(false);
        };
        if task.alarm_time == alarm_time {
            return Ok(true);
        }
        task.alarm_time = alarm_time;
        save_state(&self.path, &state)?;
        Ok(true)
    }

    fn clear_alarm_if(&self, id: TaskId, expected: i64) -> Result<bool, AppError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|task| task.id == id && task.alarm_time == Some(expected))
        else {
            return Ok(false);
        };
        task.alarm_time = None;
        save_state(&self.path, &state)?;
        Ok(true)
    }
}

impl TaskRepository for JsonTaskStore {
    fn insert(&self, new_task: NewTask, created_at: String) -> Result<Task, AppError> {
        self.modify(|state| {
            let task = build_task(state.next_id, new_task, created_at);
            state.next_id += 1;
            state.tasks.push(task.clone());
            Ok(task)
        })
    }

    fn update(&self, task: &Task) -> Result<(), AppError> {
        self.modify(|state| {
            let slot = state
                .tasks
                .iter_mut()
                .find(|existing| existing.id == task.id)
                .ok_or_else(|| AppError::invalid_input("task not found"))?;
            *slot = task.clone();
            Ok(())
        })
    }

    fn delete(&self, id: TaskId) -> Result<Option<Task>, AppError> {
        self.modify(|state| {
            Ok(state
                .tasks
                .iter()
                .position(|task| task.id == id)
                .map(|index| state.tasks.remove(index)))
        })
    }

    fn all(&self) -> Result<Vec<Task>, AppError> {
        let _guard = self.lock();
        Ok(load_state(&self.path)?.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonTaskStore, SCHEMA_VERSION, load_state};
    use crate::model::{NewTask, TaskStatus};
    use crate::storage::{TaskRepository, TaskStore};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(file_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("remind-{nanos}-{file_name}"))
    }

    fn reminder_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            due_date: Some("2030-01-15".into()),
            due_time: Some("09:30".into()),
            has_reminder: true,
            ..NewTask::default()
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let path = temp_path("ids.json");
        let store = JsonTaskStore::new(&path);

        let first = store.insert(reminder_task("one"), "2025-03-01T00:00:00Z".into()).unwrap();
        let second = store.insert(reminder_task("two"), "2025-03-01T00:00:00Z".into()).unwrap();
        store.delete(second.id).unwrap();
        let third = store.insert(reminder_task("three"), "2025-03-01T00:00:00Z".into()).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(third.id, 3);
    }

    #[test]
    fn reminder_fields_round_trip() {
        let path = temp_path("round-trip.json");
        let store = JsonTaskStore::new(&path);
        let task = store.insert(reminder_task("pay rent"), "2025-03-01T00:00:00Z".into()).unwrap();

        assert!(store.record_alarm(task.id, Some(1_894_699_740_000)).unwrap());
        let reloaded = JsonTaskStore::new(&path).get_task(task.id).unwrap().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(reloaded.due_date.as_deref(), Some("2030-01-15"));
        assert_eq!(reloaded.due_time.as_deref(), Some("09:30"));
        assert!(reloaded.has_reminder);
        assert_eq!(reloaded.alarm_time, Some(1_894_699_740_000));
    }

    #[test]
    fn record_alarm_on_missing_row_reports_false() {
        let path = temp_path("missing-row.json");
        let store = JsonTaskStore::new(&path);

        assert!(!store.record_alarm(42, None).unwrap());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn clear_alarm_if_leaves_a_newer_time() {
        let path = temp_path("clear-if.json");
        let store = JsonTaskStore::new(&path);
        let task = store.insert(reminder_task("standup"), "2025-03-01T00:00:00Z".into()).unwrap();
        store.record_alarm(task.id, Some(2_000)).unwrap();

        let stale = store.clear_alarm_if(task.id, 1_000).unwrap();
        let kept = store.get_task(task.id).unwrap().unwrap().alarm_time;
        let current = store.clear_alarm_if(task.id, 2_000).unwrap();
        let cleared = store.get_task(task.id).unwrap().unwrap().alarm_time;
        fs::remove_file(&path).ok();

        assert!(!stale);
        assert_eq!(kept, Some(2_000));
        assert!(current);
        assert_eq!(cleared, None);
    }

    #[test]
    fn pending_with_reminder_filters_rows() {
        let path = temp_path("pending.json");
        let store = JsonTaskStore::new(&path);
        let wanted = store.insert(reminder_task("wanted"), "2025-03-01T00:00:00Z".into()).unwrap();
        store
            .insert(
                NewTask {
                    has_reminder: false,
                    ..reminder_task("no reminder")
                },
                "2025-03-01T00:00:00Z".into(),
            )
            .unwrap();
        store
            .insert(
                NewTask {
                    due_time: None,
                    ..reminder_task("no time")
                },
                "2025-03-01T00:00:00Z".into(),
            )
            .unwrap();
        let mut done = store.insert(reminder_task("done"), "2025-03-01T00:00:00Z".into()).unwrap();
        done.status = TaskStatus::Completed;
        store.update(&done).unwrap();

        let pending = store.pending_with_reminder().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, wanted.id);
    }

    #[test]
    fn missing_or_empty_file_is_an_empty_store() {
        let path = temp_path("absent.json");
        assert!(load_state(&path).unwrap().tasks.is_empty());

        fs::write(&path, "  \n").unwrap();
        let state = load_state(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(state.tasks.is_empty());
        assert_eq!(state.next_id, 1);
    }

    #[test]
    fn partial_rows_load_and_next_id_is_derived() {
        let path = temp_path("partial.json");
        let content = "{\n  \"schema_version\": 1,\n  \"tasks\": [\n    {\n      \"id\": 4,\n      \"title\": \"legacy\",\n      \"status\": \"pending\",\n      \"created_at\": \"2025-03-01T00:00:00Z\",\n      \"due_date\": \"2030-01-15\",\n      \"alarm_time\": 0\n    }\n  ]\n}";
        fs::write(&path, content).unwrap();

        let state = load_state(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(state.next_id, 5);
        assert_eq!(state.tasks[0].due_time, None);
        assert_eq!(state.tasks[0].alarm_time, None);
        assert!(!state.tasks[0].has_reminder);
    }

    #[test]
    fn schema_version_must_match() {
        let path = temp_path("bad-schema.json");
        let bad = format!(
            "{{\n  \"schema_version\": {},\n  \"tasks\": []\n}}",
            SCHEMA_VERSION + 1
        );
        fs::write(&path, bad).unwrap();

        let err = load_state(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn rejects_non_boolean_reminder_flag() {
        let path = temp_path("bad-flag.json");
        let content = "{\n  \"schema_version\": 1,\n  \"tasks\": [\n    {\n      \"id\": 1,\n      \"title\": \"demo\",\n      \"status\": \"pending\",\n      \"created_at\": \"2025-03-01T00:00:00Z\",\n      \"has_reminder\": \"yes\"\n    }\n  ]\n}";
        fs::write(&path, content).unwrap();

        let err = load_state(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }
}

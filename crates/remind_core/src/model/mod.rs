mod task;

pub use task::{DEFAULT_CATEGORY, DEFAULT_PRIORITY, NewTask, Task, TaskId, TaskStatus};

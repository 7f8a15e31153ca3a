pub mod alarm;
pub mod clock;
pub mod config;
pub mod error;
pub mod fire;
pub mod host;
pub mod model;
pub mod notice;
pub mod notify;
pub mod restore;
pub mod scheduler;
pub mod storage;
pub mod task_api;

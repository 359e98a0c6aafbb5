//! Job orchestration: the model/state machine and the registry service.

pub mod model;
pub mod service;

pub use model::{Job, JobSnapshot, TaskInput, TaskResult, TaskStatus};
pub use service::JobService;

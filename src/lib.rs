//! Autopilot Local — job/task orchestration over a browser-automation engine.

pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod profile;
pub mod server;
pub mod task;
pub mod task_action;

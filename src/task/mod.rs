//! Single-task execution: the runner and its liveness probe.

pub mod liveness;
pub mod runner;

pub use liveness::LivenessProbe;
pub use runner::TaskRunner;

//! Error types for Autopilot Local.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job registry and lifecycle errors.
///
/// These map directly onto the client-facing taxonomy: `InvalidArgument`
/// is a 400, `NotFound` a 404, `Conflict` a 409.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Job not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),
}

/// Automation-engine boundary errors.
///
/// Anything that goes wrong while acquiring the LLM client, launching a
/// browser session, or driving the engine itself. Always contained at the
/// TaskRunner boundary and folded into a failed `TaskResult`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to launch browser session: {0}")]
    SessionLaunch(String),

    #[error("Engine run failed: {0}")]
    Run(String),

    #[error("Focus recovery failed: {0}")]
    FocusRecovery(String),

    #[error("Session teardown failed: {0}")]
    Teardown(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

//! Configuration types.
//!
//! `JobConfig` arrives per job over the HTTP surface; `EnvConfig` is read
//! once from the environment at startup and shared across jobs.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-job execution parameters. Immutable once a job is created from it.
///
/// Every optional field defaults to `None`, which means "use the automation
/// engine's own default" — the runner must not pass a value the caller
/// never set (see [`crate::engine::RunOptions`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// LLM model name.
    pub model: String,
    /// Step budget per task.
    pub max_steps: u32,
    /// Run the browser headless.
    pub headless: bool,

    /// Whether the engine attaches screenshots to LLM calls.
    pub use_vision: Option<bool>,
    /// Maximum consecutive step failures before the engine gives up.
    pub max_failures: Option<u32>,
    /// Maximum actions the engine may take in a single step.
    pub max_actions_per_step: Option<u32>,
    /// Whether the engine runs an explicit thinking phase.
    pub use_thinking: Option<bool>,
    /// Engine fast mode.
    pub flash_mode: Option<bool>,
    /// LLM call timeout in seconds.
    pub llm_timeout: Option<u64>,
    /// Per-step timeout in seconds.
    pub step_timeout: Option<u64>,

    /// Replace the engine's system prompt entirely.
    pub override_system_message: Option<String>,
    /// Append to the engine's system prompt.
    pub extend_system_message: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-flash-preview".to_string(),
            max_steps: 1000,
            headless: false,
            use_vision: None,
            max_failures: None,
            max_actions_per_step: None,
            use_thinking: None,
            flash_mode: None,
            llm_timeout: None,
            step_timeout: None,
            override_system_message: None,
            extend_system_message: None,
        }
    }
}

/// Which automation backend the process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Scripted backend, no real browser. For local development and tests.
    DryRun,
}

/// Environment-sourced settings, read once at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// LLM API key (`ELE_LLM_API_KEY`).
    pub llm_api_key: Option<SecretString>,
    /// Browser executable (`CHROME_EXECUTABLE_PATH`).
    pub chrome_executable_path: Option<String>,
    /// Browser user-data directory (`CHROME_USER_DATA_DIR`).
    pub chrome_user_data_dir: Option<String>,
    /// Profile directory name within user-data (`CHROME_PROFILE_DIRECTORY`).
    pub chrome_profile_directory: String,
    /// Bind host for the HTTP surface (`AUTOPILOT_HOST`).
    pub host: String,
    /// Bind port for the HTTP surface (`AUTOPILOT_PORT`).
    pub port: u16,
    /// Automation backend selection (`AUTOPILOT_ENGINE`).
    pub engine: EngineKind,
}

impl EnvConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("AUTOPILOT_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AUTOPILOT_PORT".to_string(),
                message: format!("not a port number: {raw}"),
            })?,
            Err(_) => 8000,
        };

        let engine = match std::env::var("AUTOPILOT_ENGINE").as_deref() {
            Ok("dry-run") | Err(_) => EngineKind::DryRun,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "AUTOPILOT_ENGINE".to_string(),
                    message: format!("unknown engine: {other}"),
                });
            }
        };

        Ok(Self {
            llm_api_key: std::env::var("ELE_LLM_API_KEY")
                .ok()
                .map(SecretString::from),
            chrome_executable_path: std::env::var("CHROME_EXECUTABLE_PATH").ok(),
            chrome_user_data_dir: std::env::var("CHROME_USER_DATA_DIR").ok(),
            chrome_profile_directory: std::env::var("CHROME_PROFILE_DIRECTORY")
                .unwrap_or_else(|_| "Default".to_string()),
            host: std::env::var("AUTOPILOT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            engine,
        })
    }
}

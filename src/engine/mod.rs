//! Boundary to the external browser-automation engine.
//!
//! The engine itself (page navigation, DOM interaction, LLM-driven action
//! selection) lives outside this crate. This module defines the seam it is
//! driven through: an [`AutomationBackend`] opens browser sessions and
//! builds per-task [`EngineHandle`]s, and a handle runs one task while
//! periodically consulting a [`StopProbe`].
//!
//! One concrete backend ships in-crate: [`dry_run::DryRunBackend`], a
//! scripted engine for running the service without a real browser attached.

pub mod dry_run;
mod history;

pub use history::{
    ActionOutcome, AgentStep, BrowserStateSnapshot, Judgement, ModelOutput, RunHistory,
    StepMetadata, TabInfo,
};

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::JobConfig;
use crate::error::EngineError;

/// LLM client parameters carried across the engine boundary.
///
/// The engine owns the actual LLM transport; this crate only selects the
/// model and hands over credentials. Temperature and output budget are
/// pinned — task execution is not a place for sampling variety.
#[derive(Debug, Clone)]
pub struct LlmSpec {
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl LlmSpec {
    pub fn new(model: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            model: model.into(),
            api_key,
            temperature: 0.0,
            max_output_tokens: 65_536,
        }
    }
}

/// Parameters for launching one browser session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub executable_path: Option<String>,
    pub user_data_dir: Option<String>,
    pub profile_directory: String,
    pub headless: bool,
}

/// Per-run engine options, sparse-override style.
///
/// Only fields the caller explicitly set are `Some`; everything else is
/// left for the engine's own defaults. Blank prompt overrides count as
/// unset — an empty system message would strip the engine of its base
/// instructions.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub use_vision: Option<bool>,
    pub max_failures: Option<u32>,
    pub max_actions_per_step: Option<u32>,
    pub use_thinking: Option<bool>,
    pub flash_mode: Option<bool>,
    pub llm_timeout: Option<u64>,
    pub step_timeout: Option<u64>,
    pub override_system_message: Option<String>,
    pub extend_system_message: Option<String>,
}

impl RunOptions {
    /// Copy only the explicitly-set fields out of a job config.
    pub fn from_config(config: &JobConfig) -> Self {
        let non_blank = |s: &Option<String>| {
            s.as_ref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.to_string())
        };

        Self {
            use_vision: config.use_vision,
            max_failures: config.max_failures,
            max_actions_per_step: config.max_actions_per_step,
            use_thinking: config.use_thinking,
            flash_mode: config.flash_mode,
            llm_timeout: config.llm_timeout,
            step_timeout: config.step_timeout,
            override_system_message: non_blank(&config.override_system_message),
            extend_system_message: non_blank(&config.extend_system_message),
        }
    }
}

/// Everything an engine needs for one task run.
pub struct EngineRequest {
    pub task: String,
    pub llm: LlmSpec,
    pub options: RunOptions,
}

/// One live browser session, exclusively owned by one task run.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// OS process id of the browser, once the engine has launched it.
    /// `None` until then.
    fn process_id(&self) -> Option<u32>;

    /// Whether the engine still holds focus on its target tab/window.
    async fn has_focus(&self) -> bool;

    /// Ask the engine to re-acquire focus on its target tab.
    async fn recover_focus(&self) -> Result<(), EngineError>;

    /// Tear the session down.
    async fn stop(&self) -> Result<(), EngineError>;
}

/// Cancellation predicate consulted by the engine between steps.
#[async_trait]
pub trait StopProbe: Send + Sync {
    async fn should_stop(&self) -> bool;
}

/// An in-flight (or about-to-run) engine bound to one task.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Drive the task to completion, stop, or step exhaustion.
    async fn run(
        &self,
        max_steps: u32,
        probe: Arc<dyn StopProbe>,
    ) -> Result<RunHistory, EngineError>;

    /// Signal the engine to stop at its next opportunity. Non-blocking.
    fn request_stop(&self);

    /// Whether the finished run ended because of a stop signal rather than
    /// natural completion.
    fn was_stopped(&self) -> bool;
}

/// Factory for sessions and engines. One per process.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    async fn open_session(
        &self,
        spec: &SessionSpec,
    ) -> Result<Arc<dyn BrowserSession>, EngineError>;

    async fn create_engine(
        &self,
        request: EngineRequest,
        session: Arc<dyn BrowserSession>,
    ) -> Result<Arc<dyn EngineHandle>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_copy_only_set_fields() {
        let config = JobConfig {
            use_vision: Some(false),
            step_timeout: Some(90),
            ..Default::default()
        };
        let options = RunOptions::from_config(&config);
        assert_eq!(options.use_vision, Some(false));
        assert_eq!(options.step_timeout, Some(90));
        assert!(options.max_failures.is_none());
        assert!(options.use_thinking.is_none());
        assert!(options.llm_timeout.is_none());
    }

    #[test]
    fn run_options_drop_blank_prompt_overrides() {
        let config = JobConfig {
            override_system_message: Some("   ".to_string()),
            extend_system_message: Some("Always use the test site.".to_string()),
            ..Default::default()
        };
        let options = RunOptions::from_config(&config);
        assert!(options.override_system_message.is_none());
        assert_eq!(
            options.extend_system_message.as_deref(),
            Some("Always use the test site.")
        );
    }
}

//! Executes one natural-language task against the automation engine.
//!
//! A runner lives for the duration of one job and is reused sequentially
//! across that job's tasks: the LLM spec is built once and cached, while
//! every `run()` call gets a fresh browser session, a fresh liveness probe,
//! and guaranteed session teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{EnvConfig, JobConfig};
use crate::engine::{
    AutomationBackend, BrowserSession, EngineHandle, EngineRequest, LlmSpec, RunHistory,
    RunOptions, SessionSpec,
};
use crate::error::EngineError;
use crate::job::model::TaskStatus;
use crate::profile;
use crate::task::LivenessProbe;

/// Outcome of one task run, copied into the job's persisted `TaskResult`.
///
/// `result` and `error` are mutually exclusive; `history` is retained for
/// payload derivation and is only present on completed runs.
#[derive(Debug)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub history: Option<RunHistory>,
}

impl TaskOutcome {
    fn completed(result: Option<String>, history: RunHistory) -> Self {
        Self {
            status: TaskStatus::Completed,
            result,
            error: None,
            completed_at: Utc::now(),
            history: Some(history),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
            history: None,
        }
    }
}

/// One-task executor. `run()` never returns an error — every failure is
/// classified into a failed [`TaskOutcome`].
pub struct TaskRunner {
    config: JobConfig,
    env: Arc<EnvConfig>,
    backend: Arc<dyn AutomationBackend>,
    llm: OnceLock<LlmSpec>,
    current_engine: Mutex<Option<Arc<dyn EngineHandle>>>,
    browser_closed: AtomicBool,
}

impl TaskRunner {
    pub fn new(
        config: JobConfig,
        env: Arc<EnvConfig>,
        backend: Arc<dyn AutomationBackend>,
    ) -> Self {
        Self {
            config,
            env,
            backend,
            llm: OnceLock::new(),
            current_engine: Mutex::new(None),
            browser_closed: AtomicBool::new(false),
        }
    }

    /// LLM parameters, built on first use and cached across tasks.
    fn llm_spec(&self) -> LlmSpec {
        self.llm
            .get_or_init(|| LlmSpec::new(self.config.model.clone(), self.env.llm_api_key.clone()))
            .clone()
    }

    fn session_spec(&self) -> SessionSpec {
        let user_data_dir = profile::resolve_user_data_dir(
            self.env.chrome_executable_path.as_deref(),
            self.env.chrome_user_data_dir.as_deref(),
            &self.env.chrome_profile_directory,
        );
        SessionSpec {
            executable_path: self.env.chrome_executable_path.clone(),
            user_data_dir: user_data_dir.map(|p| p.to_string_lossy().into_owned()),
            profile_directory: self.env.chrome_profile_directory.clone(),
            headless: self.config.headless,
        }
    }

    /// Execute one task. `running → {completed | failed}` per call.
    pub async fn run(&self, task: &str) -> TaskOutcome {
        self.browser_closed.store(false, Ordering::SeqCst);

        let outcome = match self.execute(task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Task execution failed: {e}");
                TaskOutcome::failed(e.to_string())
            }
        };

        // The engine reference must not outlive its run.
        *self.current_engine.lock().unwrap_or_else(|p| p.into_inner()) = None;
        outcome
    }

    async fn execute(&self, task: &str) -> Result<TaskOutcome, EngineError> {
        let llm = self.llm_spec();
        let session = self.backend.open_session(&self.session_spec()).await?;

        let result = self.drive(task, llm, Arc::clone(&session)).await;

        // Teardown must never mask the task's actual outcome.
        if let Err(e) = session.stop().await {
            debug!("Browser teardown error (ignored): {e}");
        }

        result
    }

    async fn drive(
        &self,
        task: &str,
        llm: LlmSpec,
        session: Arc<dyn BrowserSession>,
    ) -> Result<TaskOutcome, EngineError> {
        let options = RunOptions::from_config(&self.config);
        let probe = Arc::new(LivenessProbe::new(Arc::clone(&session)));

        info!("Running task: {task:?}");
        let engine = self
            .backend
            .create_engine(
                EngineRequest {
                    task: task.to_string(),
                    llm,
                    options,
                },
                session,
            )
            .await?;
        *self
            .current_engine
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&engine));

        let history = engine.run(self.config.max_steps, probe.clone()).await?;

        if probe.browser_closed_by_user() {
            self.browser_closed.store(true, Ordering::SeqCst);
        }

        // Stop-vs-natural-completion is a pure post-condition check.
        if engine.was_stopped() && !history.is_done() {
            return Ok(TaskOutcome::failed("Task stopped"));
        }

        let rendered = (history.number_of_steps() > 0).then(|| history.to_string());
        Ok(TaskOutcome::completed(rendered, history))
    }

    /// Signal the in-flight engine (if any) to stop at its next opportunity.
    /// Returns whether a signal was actually sent; does not block.
    pub fn stop_current_task(&self) -> bool {
        let engine = self
            .current_engine
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match engine.as_ref() {
            Some(engine) => {
                engine.request_stop();
                true
            }
            None => false,
        }
    }

    /// Whether the last run ended because the user closed the browser.
    pub fn browser_closed_by_user(&self) -> bool {
        self.browser_closed.load(Ordering::SeqCst)
    }
}

//! Job model: an ordered batch of tasks executed sequentially under one
//! configuration, with one aggregate lifecycle status.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::callback::CallbackClient;
use crate::config::{EnvConfig, JobConfig};
use crate::engine::AutomationBackend;
use crate::error::JobError;
use crate::task::TaskRunner;
use crate::task_action::TaskActionHandler;

/// Task lifecycle status, also used as the job's aggregate status.
///
/// `pending → running → {completed | failed}`; no transition leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One task as submitted by the caller: plain text, or text paired with the
/// controller-side task id it originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskInput {
    Text(String),
    WithId { id: String, text: String },
}

impl TaskInput {
    pub fn id(&self) -> &str {
        match self {
            Self::Text(_) => "",
            Self::WithId { id, .. } => id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::WithId { text, .. } => text,
        }
    }
}

/// One task's execution record. `result` and `error` are mutually
/// exclusive: result is set only on completion, error only on failure.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task: String,
    /// Controller-side source task id; empty when running standalone.
    pub task_id: String,
    /// Position in the job's task list.
    pub task_index: usize,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskResult {
    fn pending(input: &TaskInput, index: usize) -> Self {
        Self {
            task: input.text().to_string(),
            task_id: input.id().to_string(),
            task_index: index,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Mutable portion of a job, guarded by one RwLock.
#[derive(Debug)]
struct JobState {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    tasks: Vec<TaskResult>,
}

impl JobState {
    /// Aggregate precedence: running > all-completed > any-failed > pending.
    fn recompute_status(&mut self) {
        self.status = if self.tasks.is_empty() {
            TaskStatus::Pending
        } else if self.tasks.iter().any(|t| t.status == TaskStatus::Running) {
            TaskStatus::Running
        } else if self.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            TaskStatus::Completed
        } else if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        };
    }

    /// Force every non-terminal task to failed with a shared error/time.
    fn fail_unfinished(&mut self, error: &str, completed_at: DateTime<Utc>) {
        for task in &mut self.tasks {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                task.completed_at = Some(completed_at);
            }
        }
    }
}

/// Read-only snapshot of a job, as returned over the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskResult>,
    pub config: JobConfig,
}

/// An ordered batch of tasks owned by the registry from creation until
/// deletion. The task list's length and order are fixed at creation;
/// entries are only mutated in place.
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    config: JobConfig,
    callback_url: Option<String>,
    state: RwLock<JobState>,
    stop_requested: AtomicBool,
    current_runner: std::sync::Mutex<Option<Arc<TaskRunner>>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("config", &self.config)
            .field("callback_url", &self.callback_url)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Build a pending job. Emptiness of `inputs` is the registry's
    /// concern, not this constructor's.
    pub fn create(
        inputs: &[TaskInput],
        config: JobConfig,
        job_id: Option<String>,
        callback_url: Option<String>,
    ) -> Arc<Self> {
        let tasks = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| TaskResult::pending(input, index))
            .collect();

        Arc::new(Self {
            id: job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: Utc::now(),
            config,
            callback_url,
            state: RwLock::new(JobState {
                status: TaskStatus::Pending,
                started_at: None,
                completed_at: None,
                tasks,
            }),
            stop_requested: AtomicBool::new(false),
            current_runner: std::sync::Mutex::new(None),
        })
    }

    pub async fn status(&self) -> TaskStatus {
        self.state.read().await.status
    }

    pub async fn tasks(&self) -> Vec<TaskResult> {
        self.state.read().await.tasks.clone()
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        let state = self.state.read().await;
        JobSnapshot {
            id: self.id.clone(),
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            tasks: state.tasks.clone(),
            config: self.config.clone(),
        }
    }

    /// Stop the whole job: the in-flight task is signalled and every task
    /// not yet started is failed once the loop observes the flag.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let runner = self
            .current_runner
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(runner) = runner.as_ref() {
            runner.stop_current_task();
        }
    }

    /// Stop one task by its controller-side id. Only the currently running
    /// task may be stopped; anything else is a conflict.
    pub async fn stop_task(&self, task_id: &str) -> Result<(), JobError> {
        let is_running = {
            let state = self.state.read().await;
            state
                .tasks
                .iter()
                .any(|t| t.task_id == task_id && t.status == TaskStatus::Running)
        };
        if !is_running {
            return Err(JobError::Conflict(format!(
                "task {task_id} is not currently running"
            )));
        }

        let runner = self
            .current_runner
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match runner.as_ref() {
            Some(runner) if runner.stop_current_task() => Ok(()),
            _ => Err(JobError::Conflict(format!(
                "task {task_id} is not currently running"
            ))),
        }
    }

    /// Run every task in order, one at a time. Contracted to leave the job
    /// and all of its tasks in a terminal state no matter what fails.
    pub async fn run(&self, backend: Arc<dyn AutomationBackend>, env: Arc<EnvConfig>) {
        let callback = CallbackClient::new(self.callback_url.clone());

        {
            let mut state = self.state.write().await;
            state.status = TaskStatus::Running;
            state.started_at = Some(Utc::now());
        }
        info!("Job {} started", self.id);

        // One runner per job run: the LLM client is cached across tasks,
        // the browser session is fresh per task.
        let runner = Arc::new(TaskRunner::new(
            self.config.clone(),
            env,
            Arc::clone(&backend),
        ));
        *self
            .current_runner
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&runner));

        self.run_tasks(&runner, &callback).await;

        *self
            .current_runner
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = None;

        let (status, error, completed_at) = {
            let mut state = self.state.write().await;
            state.completed_at = Some(Utc::now());
            state.recompute_status();
            let error = state
                .tasks
                .iter()
                .find_map(|t| t.error.clone());
            (state.status, error, state.completed_at)
        };
        info!("Job {} finished: {status}", self.id);

        callback
            .report_job_complete(status, error.as_deref(), completed_at)
            .await;
        callback.close();
    }

    /// Force the job and every unfinished task into a terminal failed
    /// state. Recovery path for when `run()` itself blew up and could not
    /// do its own bookkeeping; nothing may stay perpetually `running`.
    pub async fn mark_aborted(&self, reason: &str) {
        warn!("Job {} aborted: {reason}", self.id);
        let completed_at = Utc::now();
        let mut state = self.state.write().await;
        state.fail_unfinished(reason, completed_at);
        if state.completed_at.is_none() {
            state.completed_at = Some(completed_at);
        }
        state.recompute_status();
    }

    async fn run_tasks(&self, runner: &TaskRunner, callback: &CallbackClient) {
        let total = self.state.read().await.tasks.len();

        for index in 0..total {
            if self.stop_requested.load(Ordering::SeqCst) {
                let completed_at = Utc::now();
                let mut state = self.state.write().await;
                state.fail_unfinished("Task stopped", completed_at);
                break;
            }

            let (task_text, task_id, started_at) = {
                let mut state = self.state.write().await;
                let task = &mut state.tasks[index];
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
                let out = (task.task.clone(), task.task_id.clone(), task.started_at);
                state.recompute_status();
                out
            };

            // Provisional update; the start time stands in for the
            // completion time until the final report supersedes it.
            callback
                .report_task_update(
                    index,
                    &task_id,
                    TaskStatus::Running,
                    None,
                    None,
                    started_at,
                    started_at,
                )
                .await;

            let outcome = runner.run(&task_text).await;

            let payload = outcome.history.as_ref().map(|history| {
                TaskActionHandler::new(history).to_cloud_payload(Some(&self.config))
            });

            {
                let mut state = self.state.write().await;
                let task = &mut state.tasks[index];
                task.status = outcome.status;
                task.result = outcome.result.clone();
                task.error = outcome.error.clone();
                task.completed_at = Some(outcome.completed_at);
                state.recompute_status();
            }

            callback
                .report_task_update(
                    index,
                    &task_id,
                    outcome.status,
                    payload,
                    outcome.error.as_deref(),
                    started_at,
                    Some(outcome.completed_at),
                )
                .await;
        }
    }
}

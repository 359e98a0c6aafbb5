//! Process-wide job registry and dispatcher.
//!
//! One instance per process, constructed at startup and injected wherever
//! orchestration is needed. The map lock is held only around map access —
//! never across task execution or network calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::config::{EnvConfig, JobConfig};
use crate::engine::AutomationBackend;
use crate::error::JobError;
use crate::job::model::{Job, TaskInput, TaskResult, TaskStatus};

pub struct JobService {
    jobs: Arc<Mutex<HashMap<String, Arc<Job>>>>,
    backend: Arc<dyn AutomationBackend>,
    env: Arc<EnvConfig>,
}

impl JobService {
    pub fn new(backend: Arc<dyn AutomationBackend>, env: Arc<EnvConfig>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            backend,
            env,
        }
    }

    /// Create a job, register it, and schedule its run as an independent
    /// unit of work. Returns as soon as the job is registered.
    pub async fn create_job(
        &self,
        inputs: &[TaskInput],
        config: JobConfig,
        job_id: Option<String>,
        callback_url: Option<String>,
    ) -> Result<Arc<Job>, JobError> {
        if inputs.is_empty() {
            return Err(JobError::InvalidArgument(
                "tasks cannot be empty".to_string(),
            ));
        }

        let job = Job::create(inputs, config, job_id, callback_url);

        {
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(&job.id) {
                return Err(JobError::Conflict(format!(
                    "job {} already exists",
                    job.id
                )));
            }
            jobs.insert(job.id.clone(), Arc::clone(&job));
        }

        self.dispatch(job.id.clone());
        Ok(job)
    }

    /// Schedule a registered job's run, detached from the caller.
    fn dispatch(&self, job_id: String) {
        let jobs = Arc::clone(&self.jobs);
        let backend = Arc::clone(&self.backend);
        let env = Arc::clone(&self.env);

        tokio::spawn(async move {
            let job = { jobs.lock().await.get(&job_id).cloned() };
            let Some(job) = job else {
                // Deleted before the run started; nothing to do.
                debug!("Job {job_id} vanished before dispatch");
                return;
            };

            // `run()` is contracted to contain its own failures; this
            // catch exists so a violation never poisons the runtime or
            // leaves the job stuck on `running`.
            let run = tokio::spawn({
                let job = Arc::clone(&job);
                async move { job.run(backend, env).await }
            });
            if let Err(e) = run.await {
                error!("Unexpected error while running job {job_id}: {e}");
                job.mark_aborted("Job aborted unexpectedly").await;
            }
        });
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Arc<Job>, JobError> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id).cloned().ok_or(JobError::NotFound)
    }

    /// All jobs, optionally filtered by status, most recently created first.
    pub async fn list_jobs(&self, status: Option<TaskStatus>) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = {
            let map = self.jobs.lock().await;
            map.values().cloned().collect()
        };

        if let Some(wanted) = status {
            let mut filtered = Vec::with_capacity(jobs.len());
            for job in jobs {
                if job.status().await == wanted {
                    filtered.push(job);
                }
            }
            jobs = filtered;
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn get_job_tasks(&self, job_id: &str) -> Result<Vec<TaskResult>, JobError> {
        let job = self.get_job(job_id).await?;
        Ok(job.tasks().await)
    }

    /// Remove a job. Running jobs cannot be deleted.
    pub async fn delete_job(&self, job_id: &str) -> Result<(), JobError> {
        let job = self.get_job(job_id).await?;
        if job.status().await == TaskStatus::Running {
            return Err(JobError::Conflict(
                "Cannot delete a running job".to_string(),
            ));
        }
        self.jobs.lock().await.remove(job_id);
        Ok(())
    }

    /// Stop a running job: the current task is signalled and the remainder
    /// of the task list is abandoned.
    pub async fn stop_job(&self, job_id: &str) -> Result<(), JobError> {
        let job = self.get_job(job_id).await?;
        if job.status().await != TaskStatus::Running {
            return Err(JobError::Conflict("Job is not running".to_string()));
        }
        job.request_stop();
        Ok(())
    }

    /// Stop one task by its controller-side id; only the currently running
    /// task qualifies.
    pub async fn stop_task(&self, job_id: &str, task_id: &str) -> Result<(), JobError> {
        let job = self.get_job(job_id).await?;
        job.stop_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::dry_run::DryRunBackend;

    fn service_with(backend: Arc<dyn AutomationBackend>) -> JobService {
        let env = Arc::new(EnvConfig {
            llm_api_key: None,
            chrome_executable_path: None,
            chrome_user_data_dir: None,
            chrome_profile_directory: "Default".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            engine: crate::config::EngineKind::DryRun,
        });
        JobService::new(backend, env)
    }

    fn service() -> JobService {
        service_with(Arc::new(DryRunBackend))
    }

    fn texts(tasks: &[&str]) -> Vec<TaskInput> {
        tasks.iter().map(|t| TaskInput::Text(t.to_string())).collect()
    }

    async fn wait_terminal(job: &Arc<Job>) -> TaskStatus {
        for _ in 0..200 {
            let status = job.status().await;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn empty_task_list_is_rejected_without_registry_entry() {
        let service = service();
        let err = service
            .create_job(&[], JobConfig::default(), Some("j".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidArgument(_)));
        assert!(service.list_jobs(None).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_job_id_conflicts() {
        let service = service();
        service
            .create_job(&texts(&["a"]), JobConfig::default(), Some("dup".to_string()), None)
            .await
            .unwrap();
        let err = service
            .create_job(&texts(&["b"]), JobConfig::default(), Some("dup".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let service = service();
        assert!(matches!(
            service.get_job("nope").await.unwrap_err(),
            JobError::NotFound
        ));
        assert!(matches!(
            service.delete_job("nope").await.unwrap_err(),
            JobError::NotFound
        ));
        assert!(matches!(
            service.stop_job("nope").await.unwrap_err(),
            JobError::NotFound
        ));
    }

    #[tokio::test]
    async fn created_job_runs_to_completion() {
        let service = service();
        let job = service
            .create_job(&texts(&["a", "b"]), JobConfig::default(), None, None)
            .await
            .unwrap();
        assert_eq!(wait_terminal(&job).await, TaskStatus::Completed);

        let tasks = service.get_job_tasks(&job.id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(tasks.iter().all(|t| t.result.is_some() && t.error.is_none()));
    }

    #[tokio::test]
    async fn delete_terminal_job_removes_it() {
        let service = service();
        let job = service
            .create_job(&texts(&["a"]), JobConfig::default(), None, None)
            .await
            .unwrap();
        wait_terminal(&job).await;

        service.delete_job(&job.id).await.unwrap();
        assert!(matches!(
            service.get_job(&job.id).await.unwrap_err(),
            JobError::NotFound
        ));
    }

    #[tokio::test]
    async fn stop_finished_job_conflicts() {
        let service = service();
        let job = service
            .create_job(&texts(&["a"]), JobConfig::default(), None, None)
            .await
            .unwrap();
        wait_terminal(&job).await;
        assert!(matches!(
            service.stop_job(&job.id).await.unwrap_err(),
            JobError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn stop_task_with_unknown_id_conflicts_and_changes_nothing() {
        let service = service();
        let job = service
            .create_job(&texts(&["a"]), JobConfig::default(), None, None)
            .await
            .unwrap();
        wait_terminal(&job).await;

        let before = job.tasks().await;
        let err = service.stop_task(&job.id, "not-a-task").await.unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));

        let after = job.tasks().await;
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.status, a.status);
        }
    }

    struct PanickingBackend;

    #[async_trait::async_trait]
    impl AutomationBackend for PanickingBackend {
        async fn open_session(
            &self,
            _spec: &crate::engine::SessionSpec,
        ) -> Result<Arc<dyn crate::engine::BrowserSession>, crate::error::EngineError> {
            panic!("backend invariant violated");
        }

        async fn create_engine(
            &self,
            _request: crate::engine::EngineRequest,
            _session: Arc<dyn crate::engine::BrowserSession>,
        ) -> Result<Arc<dyn crate::engine::EngineHandle>, crate::error::EngineError> {
            panic!("backend invariant violated");
        }
    }

    #[tokio::test]
    async fn panicked_run_is_swept_to_a_terminal_failure() {
        let service = service_with(Arc::new(PanickingBackend));
        let job = service
            .create_job(&texts(&["a", "b"]), JobConfig::default(), None, None)
            .await
            .unwrap();

        assert_eq!(wait_terminal(&job).await, TaskStatus::Failed);
        let tasks = job.tasks().await;
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Failed));
        assert!(
            tasks
                .iter()
                .all(|t| t.error.as_deref() == Some("Job aborted unexpectedly"))
        );
    }

    #[tokio::test]
    async fn list_jobs_sorted_most_recent_first_with_filter() {
        let service = service();
        let first = service
            .create_job(&texts(&["a"]), JobConfig::default(), None, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = service
            .create_job(&texts(&["b"]), JobConfig::default(), None, None)
            .await
            .unwrap();

        wait_terminal(&first).await;
        wait_terminal(&second).await;

        let all = service.list_jobs(None).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);

        let completed = service.list_jobs(Some(TaskStatus::Completed)).await;
        assert_eq!(completed.len(), 2);
        let running = service.list_jobs(Some(TaskStatus::Running)).await;
        assert!(running.is_empty());
    }
}

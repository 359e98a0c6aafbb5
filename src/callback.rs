//! Best-effort status reporting to an optional remote controller.
//!
//! Bound to a per-job base URL (`.../task` and `.../complete` POSTs). With
//! no URL configured every report is a successful no-op, so job execution
//! behaves identically with or without a controller attached. Reporting
//! failures are logged and swallowed — they must never interrupt a job.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::warn;

use crate::job::model::TaskStatus;

pub struct CallbackClient {
    base_url: Option<String>,
    client: std::sync::Mutex<Option<reqwest::Client>>,
}

impl CallbackClient {
    /// `base_url` is the controller's per-job callback root, e.g.
    /// `http://server:port/api/jobs/{job_id}/callback`. `None` disables
    /// reporting entirely.
    pub fn new(base_url: Option<String>) -> Self {
        let client = base_url.as_ref().map(|_| {
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default()
        });
        Self {
            base_url,
            client: std::sync::Mutex::new(client),
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn post(&self, path: &str, body: Value) -> bool {
        let Some(client) = self.client() else {
            // No controller attached: report success.
            return true;
        };
        let Some(base) = self.base_url.as_deref() else {
            return true;
        };

        let url = format!("{base}/{path}");
        match client.post(&url).json(&body).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let text: String = text.chars().take(500).collect();
                warn!("Callback {path} returned non-200 status: {status}, body: {text}");
                false
            }
            Err(e) => {
                warn!("Callback {path} failed: {e}");
                false
            }
        }
    }

    /// Report one task's status snapshot. Returns whether the report was
    /// accepted; never errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn report_task_update(
        &self,
        task_index: usize,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> bool {
        let body = serde_json::json!({
            "task_index": task_index,
            "task_id": task_id,
            "status": status,
            "result": result,
            "error": error,
            "started_at": started_at.map(|t| t.to_rfc3339()),
            "completed_at": completed_at.map(|t| t.to_rfc3339()),
        });
        self.post("task", body).await
    }

    /// Report job-level completion. Same contract as task updates.
    pub async fn report_job_complete(
        &self,
        status: TaskStatus,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> bool {
        let body = serde_json::json!({
            "status": status,
            "error": error,
            "completed_at": completed_at.map(|t| t.to_rfc3339()),
        });
        self.post("complete", body).await
    }

    /// Release the underlying transport. Idempotent; reports after close
    /// are successful no-ops.
    pub fn close(&self) {
        *self.client.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

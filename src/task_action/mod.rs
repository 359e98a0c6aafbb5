//! Normalizes a finished run's history into stable, JSON-safe projections.
//!
//! Pure transformation, no I/O: a [`RunHistory`] goes in, a summary, a
//! per-step detail list, and a cloud upload payload come out. Every
//! timestamp in the output is epoch milliseconds, and the conversion is
//! total — a value that cannot be serialized degrades to a string
//! rendering instead of failing the whole payload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::JobConfig;
use crate::engine::{AgentStep, RunHistory};

/// Values at or above this magnitude are already epoch milliseconds;
/// below it they are treated as epoch seconds.
const EPOCH_MS_THRESHOLD: f64 = 10_000_000_000.0;

/// Keys whose values are normalized to epoch milliseconds wherever they
/// appear in a payload tree.
const TIMESTAMP_KEYS: [&str; 6] = [
    "timestamp",
    "created_at",
    "started_at",
    "completed_at",
    "step_start_time",
    "step_end_time",
];

/// Best-effort conversion of a JSON value to epoch milliseconds.
///
/// Numbers are disambiguated by magnitude (so the conversion is idempotent
/// on already-millisecond values); strings are parsed as ISO-8601.
pub fn coerce_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64()?;
            if v.abs() >= EPOCH_MS_THRESHOLD {
                Some(v as i64)
            } else {
                Some((v * 1000.0) as i64)
            }
        }
        Value::String(s) => parse_iso_datetime(s).map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

fn parse_iso_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive timestamps are taken as UTC.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Epoch value (seconds or milliseconds, disambiguated by magnitude) to a
/// concrete instant.
fn epoch_to_datetime(v: f64) -> Option<DateTime<Utc>> {
    let ms = if v.abs() >= EPOCH_MS_THRESHOLD {
        v as i64
    } else {
        (v * 1000.0) as i64
    };
    DateTime::from_timestamp_millis(ms)
}

/// Walk a value tree, rewriting every timestamp-named field to epoch ms.
fn normalize_timestamps(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let v = if TIMESTAMP_KEYS.contains(&key.as_str()) {
                        match coerce_epoch_ms(&v) {
                            Some(ms) => Value::from(ms),
                            None => normalize_timestamps(v),
                        }
                    } else {
                        normalize_timestamps(v)
                    };
                    (key, v)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(normalize_timestamps).collect())
        }
        other => other,
    }
}

/// Total conversion to a JSON-safe, timestamp-normalized value. Never
/// fails: an unserializable input becomes its error rendering.
pub fn json_safe<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => normalize_timestamps(v),
        Err(e) => Value::String(format!("<unserializable: {e}>")),
    }
}

/// Task execution summary, built for the cloud upload.
#[derive(Debug, Clone, Serialize)]
pub struct TaskActionSummary {
    /// `completed` / `failed` / `incomplete`.
    pub status: String,
    pub is_done: bool,
    pub is_successful: Option<bool>,
    /// Epoch ms.
    pub started_at: Option<i64>,
    /// Epoch ms.
    pub completed_at: Option<i64>,
    pub duration_seconds: f64,

    pub total_steps: usize,
    pub total_actions: usize,
    pub step_error_count: usize,
    pub action_error_count: usize,

    pub final_result: Option<String>,
    pub judgement: Option<Value>,
    pub is_validated: Option<bool>,
    pub all_extracted_content: Vec<String>,

    pub visited_urls: Vec<String>,
    pub action_sequence: Vec<String>,

    pub errors: Vec<String>,
    pub action_errors: Vec<String>,
}

/// One step, flattened for display and upload.
#[derive(Debug, Clone, Serialize)]
pub struct StepDetail {
    pub step_number: u32,
    pub url: Option<String>,
    pub page_title: Option<String>,
    pub tabs: Vec<Value>,
    pub state_message: Option<String>,

    pub thinking: Option<String>,
    /// Screenshot the LLM saw when deciding this step's actions.
    pub thinking_image: Option<String>,
    pub evaluation: Option<String>,
    pub memory: Option<String>,
    pub next_goal: Option<String>,
    pub model_output: Option<Value>,

    pub results: Value,

    pub duration_seconds: Option<f64>,
    /// Epoch ms.
    pub step_start_time: Option<i64>,
    /// Epoch ms.
    pub step_end_time: Option<i64>,
    pub metadata: Option<Value>,
    /// Full browser-state snapshot, string-serialized.
    pub state: Option<String>,
}

/// Derives the read-only projections of one finished run.
pub struct TaskActionHandler<'a> {
    history: &'a RunHistory,
}

impl<'a> TaskActionHandler<'a> {
    pub fn new(history: &'a RunHistory) -> Self {
        Self { history }
    }

    /// Task start/end derived from step metadata: minimum step start,
    /// maximum step end.
    fn derive_task_times(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let mut starts = Vec::new();
        let mut ends = Vec::new();

        for step in &self.history.steps {
            let Some(md) = &step.metadata else { continue };
            if let Some(start) = epoch_to_datetime(md.step_start_time) {
                starts.push(start);
            }
            if let Some(end) = epoch_to_datetime(md.step_end_time) {
                ends.push(end);
            }
        }

        (starts.into_iter().min(), ends.into_iter().max())
    }

    pub fn extract_summary(&self) -> TaskActionSummary {
        let step_errors = self.history.step_errors();
        let action_errors = self.history.action_errors();

        let (started_at, completed_at) = self.derive_task_times();
        // Prefer wall-clock span over the engine's own duration figure
        // when per-step timestamps are available.
        let mut duration = self.history.total_duration_seconds();
        if let (Some(start), Some(end)) = (started_at, completed_at) {
            duration = ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0);
        }

        let is_done = self.history.is_done();
        let is_successful = self.history.is_successful();
        let status = if !is_done {
            "incomplete"
        } else if is_successful == Some(true) {
            "completed"
        } else {
            "failed"
        };

        TaskActionSummary {
            status: status.to_string(),
            is_done,
            is_successful,
            started_at: started_at.map(|t| t.timestamp_millis()),
            completed_at: completed_at.map(|t| t.timestamp_millis()),
            duration_seconds: duration,
            total_steps: self.history.number_of_steps(),
            total_actions: self.history.total_actions(),
            step_error_count: step_errors.len(),
            action_error_count: action_errors.len(),
            final_result: self.history.final_result().map(|s| s.to_string()),
            judgement: self.history.judgement().map(json_safe),
            is_validated: self.history.is_validated(),
            all_extracted_content: self.history.extracted_content(),
            visited_urls: self.history.urls(),
            action_sequence: self.history.action_names(),
            errors: step_errors,
            action_errors,
        }
    }

    pub fn extract_step_details(&self) -> Vec<StepDetail> {
        self.history
            .steps
            .iter()
            .enumerate()
            .map(|(idx, step)| self.step_detail(idx, step))
            .collect()
    }

    fn step_detail(&self, idx: usize, step: &AgentStep) -> StepDetail {
        let output = step.model_output.as_ref();
        let md = step.metadata.as_ref();

        StepDetail {
            step_number: md.map(|m| m.step_number).unwrap_or(idx as u32 + 1),
            url: step.state.url.clone(),
            page_title: step.state.title.clone(),
            tabs: step.state.tabs.iter().map(json_safe).collect(),
            state_message: step.state_message.clone(),
            thinking: output.and_then(|o| o.thinking.clone()),
            thinking_image: step
                .state
                .screenshot_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            evaluation: output.and_then(|o| o.evaluation_previous_goal.clone()),
            memory: output.and_then(|o| o.memory.clone()),
            next_goal: output.and_then(|o| o.next_goal.clone()),
            model_output: output.map(json_safe),
            results: json_safe(&step.results),
            duration_seconds: md.map(|m| m.duration_seconds()),
            step_start_time: md.and_then(|m| epoch_to_datetime(m.step_start_time))
                .map(|t| t.timestamp_millis()),
            step_end_time: md.and_then(|m| epoch_to_datetime(m.step_end_time))
                .map(|t| t.timestamp_millis()),
            metadata: md.map(json_safe),
            state: serde_json::to_string(&json_safe(&step.state)).ok(),
        }
    }

    /// Assemble the upload envelope: runtime metadata, optional config,
    /// summary, step details, and a raw serialized dump of the history.
    pub fn to_cloud_payload(&self, config: Option<&JobConfig>) -> Value {
        let summary = self.extract_summary();
        let steps = self.extract_step_details();

        let mut runtime = serde_json::json!({
            "app": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "platform": {
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
            },
        });
        if let Some(config) = config {
            runtime["config"] = json_safe(config);
        }

        let raw_history =
            serde_json::to_string(&json_safe(self.history)).unwrap_or_default();

        normalize_timestamps(serde_json::json!({
            "timestamp": Utc::now().timestamp_millis(),
            "runtime": runtime,
            "summary": json_safe(&summary),
            "steps": steps.iter().map(json_safe).collect::<Vec<_>>(),
            "raw_history": raw_history,
        }))
    }
}

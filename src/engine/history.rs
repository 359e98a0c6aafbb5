//! The engine's run-history tree.
//!
//! One [`RunHistory`] is produced per task run: a step-by-step record of
//! what the engine saw, thought, and did. Downstream it is never mutated —
//! `task_action` derives summaries and the cloud payload from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Complete execution history of one engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    pub steps: Vec<AgentStep>,
}

/// One step: LLM output, action outcomes, and a browser-state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStep {
    pub model_output: Option<ModelOutput>,
    pub results: Vec<ActionOutcome>,
    pub state: BrowserStateSnapshot,
    pub metadata: Option<StepMetadata>,
    pub state_message: Option<String>,
}

/// What the LLM produced for one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOutput {
    pub thinking: Option<String>,
    pub evaluation_previous_goal: Option<String>,
    pub memory: Option<String>,
    pub next_goal: Option<String>,
    /// Actions as the engine reports them: one object per action, keyed by
    /// the action name (`{"navigate": {...}}`, `{"done": {...}}`, ...).
    pub actions: Vec<Value>,
}

/// Outcome of one executed action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub is_done: Option<bool>,
    /// Only meaningful on the `done` action.
    pub success: Option<bool>,
    pub error: Option<String>,
    pub extracted_content: Option<String>,
    pub long_term_memory: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub judgement: Option<Judgement>,
    pub metadata: Option<Value>,
}

/// Judge verdict on a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgement {
    pub reasoning: Option<String>,
    pub verdict: bool,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub impossible_task: bool,
    #[serde(default)]
    pub reached_captcha: bool,
}

/// Step timing as reported by the engine, epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step_number: u32,
    pub step_start_time: f64,
    pub step_end_time: f64,
}

impl StepMetadata {
    pub fn duration_seconds(&self) -> f64 {
        (self.step_end_time - self.step_start_time).max(0.0)
    }
}

/// Browser state captured before the step's actions ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserStateSnapshot {
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
    pub screenshot_path: Option<std::path::PathBuf>,
    /// Elements the step's actions interacted with, as reported.
    #[serde(default)]
    pub interacted_elements: Vec<Value>,
}

/// One open tab.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabInfo {
    pub url: String,
    pub title: String,
    pub target_id: String,
    pub parent_target_id: Option<String>,
}

impl RunHistory {
    fn done_outcome(&self) -> Option<&ActionOutcome> {
        self.steps
            .iter()
            .flat_map(|s| s.results.iter())
            .find(|r| r.is_done == Some(true))
    }

    /// Whether the run ever signalled done.
    pub fn is_done(&self) -> bool {
        self.done_outcome().is_some()
    }

    /// Success of the done action; `None` when the run never finished.
    pub fn is_successful(&self) -> Option<bool> {
        self.done_outcome().map(|r| r.success.unwrap_or(false))
    }

    /// Final extracted content of the done action.
    pub fn final_result(&self) -> Option<&str> {
        self.done_outcome()
            .and_then(|r| r.extracted_content.as_deref())
    }

    pub fn judgement(&self) -> Option<&Judgement> {
        self.done_outcome().and_then(|r| r.judgement.as_ref())
    }

    /// Judge verdict, when the run was judged at all.
    pub fn is_validated(&self) -> Option<bool> {
        self.judgement().map(|j| j.verdict)
    }

    /// First error of each step that had one.
    pub fn step_errors(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.results.iter().find_map(|r| r.error.clone()))
            .collect()
    }

    /// Every action-level error across all steps.
    pub fn action_errors(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|s| s.results.iter())
            .filter_map(|r| r.error.clone())
            .collect()
    }

    /// URLs visited, in step order.
    pub fn urls(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.state.url.clone())
            .filter(|u| !u.is_empty())
            .collect()
    }

    /// Action names in execution order, taken from each action object's key.
    pub fn action_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.model_output.as_ref())
            .flat_map(|o| o.actions.iter())
            .filter_map(|a| a.as_object().and_then(|m| m.keys().next().cloned()))
            .collect()
    }

    pub fn total_actions(&self) -> usize {
        self.steps
            .iter()
            .filter_map(|s| s.model_output.as_ref())
            .map(|o| o.actions.len())
            .sum()
    }

    /// Every non-empty extracted content, in order.
    pub fn extracted_content(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|s| s.results.iter())
            .filter_map(|r| r.extracted_content.clone())
            .collect()
    }

    pub fn number_of_steps(&self) -> usize {
        self.steps.len()
    }

    /// Sum of per-step durations as the engine reported them.
    pub fn total_duration_seconds(&self) -> f64 {
        self.steps
            .iter()
            .filter_map(|s| s.metadata.as_ref())
            .map(|m| m.duration_seconds())
            .sum()
    }
}

impl std::fmt::Display for RunHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.final_result() {
            Some(result) => write!(f, "{result}"),
            None => write!(
                f,
                "RunHistory({} steps, done={})",
                self.number_of_steps(),
                self.is_done()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done_step(success: bool, content: &str) -> AgentStep {
        AgentStep {
            model_output: Some(ModelOutput {
                actions: vec![serde_json::json!({"done": {"text": content}})],
                ..Default::default()
            }),
            results: vec![ActionOutcome {
                is_done: Some(true),
                success: Some(success),
                extracted_content: Some(content.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn empty_history_is_not_done() {
        let history = RunHistory::default();
        assert!(!history.is_done());
        assert!(history.is_successful().is_none());
        assert!(history.final_result().is_none());
        assert_eq!(history.total_duration_seconds(), 0.0);
    }

    #[test]
    fn done_step_drives_result_accessors() {
        let history = RunHistory {
            steps: vec![done_step(true, "booked the table")],
        };
        assert!(history.is_done());
        assert_eq!(history.is_successful(), Some(true));
        assert_eq!(history.final_result(), Some("booked the table"));
        assert_eq!(history.action_names(), vec!["done".to_string()]);
        assert_eq!(history.to_string(), "booked the table");
    }

    #[test]
    fn errors_split_by_granularity() {
        let step = AgentStep {
            results: vec![
                ActionOutcome {
                    error: Some("click missed".to_string()),
                    ..Default::default()
                },
                ActionOutcome {
                    error: Some("retry missed".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let history = RunHistory {
            steps: vec![step, done_step(false, "gave up")],
        };
        // One error per step vs. every action error.
        assert_eq!(history.step_errors(), vec!["click missed".to_string()]);
        assert_eq!(history.action_errors().len(), 2);
        assert_eq!(history.is_successful(), Some(false));
    }

    #[test]
    fn step_duration_clamps_negative() {
        let md = StepMetadata {
            step_number: 1,
            step_start_time: 100.0,
            step_end_time: 90.0,
        };
        assert_eq!(md.duration_seconds(), 0.0);
    }
}

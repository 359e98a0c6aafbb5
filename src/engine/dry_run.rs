//! Scripted automation backend.
//!
//! Runs the whole orchestration stack without a browser or an LLM: every
//! task "navigates" once and then reports done. Selected with
//! `AUTOPILOT_ENGINE=dry-run`; also the backend integration tests run
//! against.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::EngineError;

use super::{
    ActionOutcome, AgentStep, AutomationBackend, BrowserSession, BrowserStateSnapshot,
    EngineHandle, EngineRequest, ModelOutput, RunHistory, SessionSpec, StepMetadata, StopProbe,
    TabInfo,
};

pub struct DryRunBackend;

struct DryRunSession {
    stopped: AtomicBool,
}

#[async_trait]
impl BrowserSession for DryRunSession {
    fn process_id(&self) -> Option<u32> {
        // No real browser process behind a dry run.
        None
    }

    async fn has_focus(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    async fn recover_focus(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct DryRunEngine {
    task: String,
    stop_requested: AtomicBool,
    stopped: AtomicBool,
}

impl DryRunEngine {
    fn scripted_step(&self, number: u32, action: &str, done: bool) -> AgentStep {
        let now = Utc::now().timestamp() as f64;
        let outcome = if done {
            ActionOutcome {
                is_done: Some(true),
                success: Some(true),
                extracted_content: Some(format!("[dry-run] {}", self.task)),
                ..Default::default()
            }
        } else {
            ActionOutcome::default()
        };
        AgentStep {
            model_output: Some(ModelOutput {
                next_goal: Some(format!("{action} for: {}", self.task)),
                actions: vec![serde_json::json!({ action: {} })],
                ..Default::default()
            }),
            results: vec![outcome],
            state: BrowserStateSnapshot {
                url: Some("about:blank".to_string()),
                title: Some("dry run".to_string()),
                tabs: vec![TabInfo {
                    url: "about:blank".to_string(),
                    title: "dry run".to_string(),
                    target_id: format!("dry-{number}"),
                    parent_target_id: None,
                }],
                ..Default::default()
            },
            metadata: Some(StepMetadata {
                step_number: number,
                step_start_time: now,
                step_end_time: now,
            }),
            state_message: None,
        }
    }
}

#[async_trait]
impl EngineHandle for DryRunEngine {
    async fn run(
        &self,
        max_steps: u32,
        probe: Arc<dyn StopProbe>,
    ) -> Result<RunHistory, EngineError> {
        let mut history = RunHistory::default();
        let script = [("navigate", false), ("done", true)];

        for (idx, (action, done)) in script.iter().enumerate() {
            if idx as u32 >= max_steps {
                break;
            }
            if self.stop_requested.load(Ordering::SeqCst) || probe.should_stop().await {
                self.stopped.store(true, Ordering::SeqCst);
                break;
            }
            history
                .steps
                .push(self.scripted_step(idx as u32 + 1, action, *done));
        }

        Ok(history)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationBackend for DryRunBackend {
    async fn open_session(
        &self,
        _spec: &SessionSpec,
    ) -> Result<Arc<dyn BrowserSession>, EngineError> {
        Ok(Arc::new(DryRunSession {
            stopped: AtomicBool::new(false),
        }))
    }

    async fn create_engine(
        &self,
        request: EngineRequest,
        _session: Arc<dyn BrowserSession>,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        Ok(Arc::new(DryRunEngine {
            task: request.task,
            stop_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }))
    }
}

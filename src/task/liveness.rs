//! Liveness/cancellation probe.
//!
//! Consulted by the automation engine between steps. Signals stop when the
//! browser process has died, or when focus on the target tab stays lost
//! past a grace period and one bounded recovery attempt fails — both of
//! which mean the user closed (or took over) the browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tracing::warn;

use crate::engine::{BrowserSession, StopProbe};

/// How long focus may stay lost before recovery is attempted.
pub const DEFAULT_FOCUS_GRACE: Duration = Duration::from_millis(1500);
/// Bound on the single focus-recovery attempt.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Probe state. The browser pid is resolved lazily — the process does not
/// exist until the engine actually launches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    NoPid,
    Watching { pid: Option<u32> },
    LostSince { pid: Option<u32>, since: Instant },
    Closed,
}

/// Per-run probe owned by the TaskRunner. `check()` is idempotent once the
/// probe has settled on `Closed`.
pub struct LivenessProbe {
    session: Arc<dyn BrowserSession>,
    state: Mutex<ProbeState>,
    system: std::sync::Mutex<System>,
    focus_grace: Duration,
    recovery_timeout: Duration,
    browser_closed: AtomicBool,
}

impl LivenessProbe {
    pub fn new(session: Arc<dyn BrowserSession>) -> Self {
        Self::with_timings(session, DEFAULT_FOCUS_GRACE, DEFAULT_RECOVERY_TIMEOUT)
    }

    pub fn with_timings(
        session: Arc<dyn BrowserSession>,
        focus_grace: Duration,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            session,
            state: Mutex::new(ProbeState::NoPid),
            system: std::sync::Mutex::new(System::new()),
            focus_grace,
            recovery_timeout,
            browser_closed: AtomicBool::new(false),
        }
    }

    /// Whether the probe concluded the browser was closed by the user.
    pub fn browser_closed_by_user(&self) -> bool {
        self.browser_closed.load(Ordering::SeqCst)
    }

    fn process_gone(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            None => true,
            Some(process) => matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        }
    }

    fn close(&self, state: &mut ProbeState, reason: &str) -> bool {
        warn!("Stopping task: {reason}");
        *state = ProbeState::Closed;
        self.browser_closed.store(true, Ordering::SeqCst);
        true
    }

    /// Check liveness now. Returns `true` when the engine should stop.
    pub async fn check(&self) -> bool {
        let mut state = self.state.lock().await;

        if *state == ProbeState::Closed {
            return true;
        }

        // Resolve the pid lazily. The browser may launch at any point after
        // the probe is created, so keep asking until the session reports one.
        let pid = match *state {
            ProbeState::NoPid | ProbeState::Watching { pid: None } => {
                let pid = self.session.process_id();
                *state = ProbeState::Watching { pid };
                pid
            }
            ProbeState::LostSince { pid: None, since } => {
                let pid = self.session.process_id();
                *state = ProbeState::LostSince { pid, since };
                pid
            }
            ProbeState::Watching { pid } | ProbeState::LostSince { pid, .. } => pid,
            ProbeState::Closed => unreachable!(),
        };

        if let Some(pid) = pid {
            if self.process_gone(pid) {
                return self.close(&mut state, "browser process exited");
            }
        }

        if self.session.has_focus().await {
            if matches!(*state, ProbeState::LostSince { .. }) {
                *state = ProbeState::Watching { pid };
            }
            return false;
        }

        match *state {
            ProbeState::LostSince { since, .. } if since.elapsed() >= self.focus_grace => {
                // Grace expired: one bounded recovery attempt, then give up.
                let recovered = matches!(
                    tokio::time::timeout(self.recovery_timeout, self.session.recover_focus())
                        .await,
                    Ok(Ok(()))
                );
                if recovered && self.session.has_focus().await {
                    *state = ProbeState::Watching { pid };
                    return false;
                }
                self.close(&mut state, "browser focus lost, recovery failed")
            }
            ProbeState::LostSince { .. } => false,
            _ => {
                *state = ProbeState::LostSince {
                    pid,
                    since: Instant::now(),
                };
                false
            }
        }
    }
}

#[async_trait]
impl StopProbe for LivenessProbe {
    async fn should_stop(&self) -> bool {
        self.check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::EngineError;

    struct FakeSession {
        pid: std::sync::Mutex<Option<u32>>,
        focused: AtomicBool,
        recover_restores_focus: bool,
    }

    impl FakeSession {
        fn new(pid: Option<u32>, focused: bool) -> Self {
            Self {
                pid: std::sync::Mutex::new(pid),
                focused: AtomicBool::new(focused),
                recover_restores_focus: false,
            }
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        fn process_id(&self) -> Option<u32> {
            *self.pid.lock().unwrap()
        }

        async fn has_focus(&self) -> bool {
            self.focused.load(Ordering::SeqCst)
        }

        async fn recover_focus(&self) -> Result<(), EngineError> {
            if self.recover_restores_focus {
                self.focused.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(EngineError::FocusRecovery("window is gone".to_string()))
            }
        }

        async fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn fast_probe(session: Arc<dyn BrowserSession>) -> LivenessProbe {
        LivenessProbe::with_timings(
            session,
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn healthy_session_keeps_running() {
        // Our own pid is necessarily alive.
        let session = Arc::new(FakeSession::new(Some(std::process::id()), true));
        let probe = fast_probe(session);
        assert!(!probe.check().await);
        assert!(!probe.check().await);
        assert!(!probe.browser_closed_by_user());
    }

    #[tokio::test]
    async fn exited_process_stops_immediately() {
        // Spawn-and-reap a child so its pid is genuinely gone.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let session = Arc::new(FakeSession::new(Some(pid), true));
        let probe = fast_probe(session);
        assert!(probe.check().await);
        assert!(probe.browser_closed_by_user());
        // Idempotent once closed.
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn focus_loss_is_tolerated_within_grace() {
        let session = Arc::new(FakeSession::new(None, false));
        let probe = fast_probe(session);
        assert!(!probe.check().await);
        assert!(!probe.browser_closed_by_user());
    }

    #[tokio::test]
    async fn persistent_focus_loss_stops_after_grace_and_failed_recovery() {
        let session = Arc::new(FakeSession::new(None, false));
        let probe = fast_probe(session);
        assert!(!probe.check().await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(probe.check().await);
        assert!(probe.browser_closed_by_user());
    }

    #[tokio::test]
    async fn successful_recovery_clears_the_loss_timer() {
        let session = Arc::new(FakeSession {
            pid: std::sync::Mutex::new(None),
            focused: AtomicBool::new(false),
            recover_restores_focus: true,
        });
        let probe = fast_probe(session.clone());
        assert!(!probe.check().await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!probe.check().await);
        assert!(!probe.browser_closed_by_user());
        assert!(session.focused.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pid_resolved_after_transient_focus_loss() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let session = Arc::new(FakeSession::new(None, false));
        let probe = fast_probe(session.clone());
        // Focus blips before the browser has launched.
        assert!(!probe.check().await);
        session.focused.store(true, Ordering::SeqCst);
        assert!(!probe.check().await);
        // The browser launches (and promptly dies) only now; the probe must
        // still pick up the pid and notice.
        *session.pid.lock().unwrap() = Some(pid);
        assert!(probe.check().await);
        assert!(probe.browser_closed_by_user());
    }

    #[tokio::test]
    async fn regained_focus_resets_lost_state() {
        let session = Arc::new(FakeSession::new(None, false));
        let probe = fast_probe(session.clone());
        assert!(!probe.check().await);
        session.focused.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Focus came back before the grace check fired.
        assert!(!probe.check().await);
        assert!(!probe.browser_closed_by_user());
    }
}

//! `Reconciler`: a pure function over a batch of sessions (`spec.md`
//! §4.3). The single mechanism by which the engine observes the
//! filesystem; invoked on every session-list request and opportunistically
//! at idle. Writes back through [`SessionStore`] one session at a time,
//! never reordering two transitions for the same session.

use super::entity::{AgentSession, SessionStatus};
use super::state_machine::SessionStateMachine;
use super::store::SessionStore;
use crate::domains::git::process_detector::ProcessDetector;
use chrono::Utc;
use log::warn;
use std::time::{Duration, Instant};

/// The reconciler skips a filesystem check that takes longer than this
/// bound and logs a warning, leaving the session untouched for that pass
/// (`spec.md` §5 Timeouts).
const FS_CHECK_BUDGET: Duration = Duration::from_millis(300);

pub struct Reconciler<'a> {
    store: &'a dyn SessionStore,
    process_detector: Option<&'a dyn ProcessDetector>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn SessionStore, process_detector: Option<&'a dyn ProcessDetector>) -> Self {
        Self {
            store,
            process_detector,
        }
    }

    /// Reconcile every session in `batch` against observed filesystem and
    /// process state, writing back any transition. Returns the
    /// (possibly updated) sessions in the same order they were passed in.
    pub fn reconcile(&self, batch: Vec<AgentSession>) -> Vec<AgentSession> {
        batch
            .into_iter()
            .map(|session| self.reconcile_one(session))
            .collect()
    }

    fn reconcile_one(&self, mut session: AgentSession) -> AgentSession {
        let started = Instant::now();
        let worktree_exists = !session.worktree_path.as_os_str().is_empty()
            && session.worktree_path.exists();

        if started.elapsed() > FS_CHECK_BUDGET {
            warn!(
                "Reconciler: filesystem check for session '{}' exceeded {:?}; skipping this pass",
                session.id, FS_CHECK_BUDGET
            );
            return session;
        }

        let process_running = self
            .process_detector
            .map(|detector| detector.is_claude_running(&session.worktree_path));

        let now = Utc::now();
        let new_status = match (session.status, worktree_exists, process_running) {
            (SessionStatus::Active, true, Some(false)) => Some(SessionStatus::Idle),
            (SessionStatus::Active, true, _) => {
                session.last_active_at = Some(now);
                None
            }
            (SessionStatus::Active, false, _) => Some(SessionStatus::Abandoned),
            (SessionStatus::Idle, true, Some(true)) => Some(SessionStatus::Active),
            (SessionStatus::Idle, true, _) => None,
            (SessionStatus::Idle, false, _) => Some(SessionStatus::Abandoned),
            (SessionStatus::Completed, _, _) => None,
            (SessionStatus::Abandoned, true, _) => Some(SessionStatus::Idle),
            (SessionStatus::Abandoned, false, _) => None,
        };

        if let Some(new_status) = new_status {
            let transition = SessionStateMachine::reconcile_to(new_status, now);
            session.status = transition.new_status;
            session.ended_at = transition.ended_at;
            if let Err(err) = self.store.update_session(&session) {
                warn!(
                    "Reconciler: failed to persist transition for session '{}': {err}",
                    session.id
                );
            }
        } else if session.last_active_at.is_some() && session.status == SessionStatus::Active {
            if let Err(err) = self.store.update_session(&session) {
                warn!(
                    "Reconciler: failed to persist last_active_at stamp for session '{}': {err}",
                    session.id
                );
            }
        }

        session
    }
}

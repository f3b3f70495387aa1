//! Legal status transitions for [`AgentSession`] and the issue cascade
//! rules that ride along with them. This is deliberately a data-driven
//! table rather than scattered control flow — `spec.md` §9 calls this out
//! explicitly: "The legal-transition table is data, not control flow."

use super::entity::{AgentSession, IssueStatus, SessionStatus, SessionType};
use crate::errors::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The target a caller asked `Close` to reach. Mirrors `spec.md` §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseTarget {
    Idle,
    Completed,
    Abandoned,
}

impl CloseTarget {
    fn into_status(self) -> SessionStatus {
        match self {
            CloseTarget::Idle => SessionStatus::Idle,
            CloseTarget::Completed => SessionStatus::Completed,
            CloseTarget::Abandoned => SessionStatus::Abandoned,
        }
    }
}

/// Effect the state machine wants applied to a session's linked issue.
/// `None` means leave the issue untouched (review sessions, or a
/// transition with no cascade rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCascade {
    None,
    SetStatus(IssueStatus),
    /// Reopen: set status to `open` and clear `closed_at`.
    Reopen,
}

#[derive(Debug)]
pub struct Transition {
    pub new_status: SessionStatus,
    pub ended_at: Option<DateTime<Utc>>,
    pub cascade: IssueCascade,
}

/// Pure decision logic for the four-state machine in `spec.md` §4.1. Holds
/// no state of its own; callers (the orchestrator) apply the resulting
/// [`Transition`] to the session and, if present, to the linked issue.
pub struct SessionStateMachine;

impl SessionStateMachine {
    /// `Close(session, target)`. Legal only from `active`/`idle`.
    pub fn close(
        session: &AgentSession,
        target: CloseTarget,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoreError> {
        if !session.status.is_live() {
            return Err(CoreError::conflict(format!(
                "Cannot close session '{}' from terminal status '{}'",
                session.id,
                session.status.as_str()
            )));
        }

        let new_status = target.into_status();
        let ended_at = new_status.is_terminal().then_some(now);

        let cascade = if session.session_type == SessionType::Review {
            IssueCascade::None
        } else {
            match target {
                CloseTarget::Idle => IssueCascade::None,
                CloseTarget::Completed => IssueCascade::SetStatus(IssueStatus::Done),
                CloseTarget::Abandoned => IssueCascade::Reopen,
            }
        };

        Ok(Transition {
            new_status,
            ended_at,
            cascade,
        })
    }

    /// `Resume(session)`. Legal only from `idle`.
    pub fn resume(session: &AgentSession, now: DateTime<Utc>) -> Result<Transition, CoreError> {
        if session.status != SessionStatus::Idle {
            return Err(CoreError::conflict(format!(
                "Cannot resume session '{}' from status '{}', expected 'idle'",
                session.id,
                session.status.as_str()
            )));
        }
        let _ = now;
        Ok(Transition {
            new_status: SessionStatus::Active,
            ended_at: None,
            cascade: IssueCascade::None,
        })
    }

    /// `Reactivate(session)`. Legal only from a terminal status; moves to
    /// `idle`, never `active` (`spec.md` §4.1).
    pub fn reactivate(session: &AgentSession) -> Result<Transition, CoreError> {
        if !session.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "Cannot reactivate session '{}' from non-terminal status '{}'",
                session.id,
                session.status.as_str()
            )));
        }

        let cascade = if session.session_type == SessionType::Review {
            IssueCascade::None
        } else {
            IssueCascade::SetStatus(IssueStatus::InProgress)
        };

        Ok(Transition {
            new_status: SessionStatus::Idle,
            ended_at: None,
            cascade,
        })
    }

    /// `DeleteWorktree` always lands on `abandoned`, regardless of the
    /// session's current status (`spec.md` §4.2: "If the session was
    /// already terminal, still attempt physical removal; do not change
    /// status."). Callers check `session.status.is_terminal()` themselves
    /// and skip calling this when already terminal.
    pub fn delete_worktree(now: DateTime<Utc>) -> Transition {
        Transition {
            new_status: SessionStatus::Abandoned,
            ended_at: Some(now),
            cascade: IssueCascade::None,
        }
    }

    /// Reconciler transition helper: active/idle promotion/demotion based
    /// on observed worktree/process state, never cascading to the issue
    /// (`spec.md` §4.3 table — none of its rows mutate the issue).
    pub fn reconcile_to(new_status: SessionStatus, now: DateTime<Utc>) -> Transition {
        Transition {
            ended_at: new_status.is_terminal().then_some(now),
            new_status,
            cascade: IssueCascade::None,
        }
    }
}

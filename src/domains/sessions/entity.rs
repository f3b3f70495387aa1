use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of an [`AgentSession`]. See `spec.md` §4.1 for the legal
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Idle)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "idle" => Some(SessionStatus::Idle),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

/// Whether a session cascades its lifecycle to a linked issue. Review
/// sessions never cascade (`spec.md` §4.1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Implementation,
    Review,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Implementation => "implementation",
            SessionType::Review => "review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "implementation" => Some(SessionType::Implementation),
            "review" => Some(SessionType::Review),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictState {
    #[default]
    None,
    SyncConflict,
    MergeConflict,
}

impl ConflictState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictState::None => "none",
            ConflictState::SyncConflict => "sync_conflict",
            ConflictState::MergeConflict => "merge_conflict",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(ConflictState::None),
            "sync_conflict" => Some(ConflictState::SyncConflict),
            "merge_conflict" => Some(ConflictState::MergeConflict),
            _ => None,
        }
    }
}

/// Core-owned entity tracking one agent's lifecycle inside one worktree.
/// Field-for-field match with `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub project_id: String,
    pub issue_id: Option<String>,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub status: SessionStatus,
    pub session_type: SessionType,
    pub conflict_state: ConflictState,
    pub conflict_files: Vec<String>,
    pub last_error: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub commit_count: u32,
    pub last_commit_hash: Option<String>,
    pub last_commit_message: Option<String>,
    pub discovered: bool,
    pub review_attempt: u32,
}

impl AgentSession {
    /// Construct a brand-new live session as produced by `Launch`.
    pub fn new_active(
        id: String,
        project_id: String,
        issue_id: Option<String>,
        branch: String,
        worktree_path: PathBuf,
        session_type: SessionType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project_id,
            issue_id,
            branch,
            worktree_path,
            status: SessionStatus::Active,
            session_type,
            conflict_state: ConflictState::None,
            conflict_files: Vec::new(),
            last_error: String::new(),
            last_sync_at: None,
            last_active_at: Some(now),
            started_at: now,
            ended_at: None,
            commit_count: 0,
            last_commit_hash: None,
            last_commit_message: None,
            discovered: false,
            review_attempt: 0,
        }
    }

    /// Invariant 1/2 from `spec.md` §3: terminal status iff `ended_at` set.
    pub fn invariants_hold(&self) -> bool {
        self.status.is_terminal() == self.ended_at.is_some()
    }

    /// `spec.md` §4.6: abandoned, zero commits, lived under a minute — the
    /// signature of a launch that was immediately aborted.
    pub fn is_stale(&self) -> bool {
        if self.status != SessionStatus::Abandoned || self.commit_count != 0 {
            return false;
        }
        match self.ended_at {
            Some(ended_at) => (ended_at - self.started_at) < chrono::Duration::seconds(60),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
    pub base_branch: String,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            id: String::new(),
            path: PathBuf::new(),
            name: String::new(),
            base_branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Done,
    Closed,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Done => "done",
            IssueStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(IssueStatus::Open),
            "in_progress" => Some(IssueStatus::InProgress),
            "done" => Some(IssueStatus::Done),
            "closed" => Some(IssueStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: IssueStatus,
    pub closed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_active_session_satisfies_invariants() {
        let session = AgentSession::new_active(
            "s1".into(),
            "p1".into(),
            Some("i1".into()),
            "feature/x".into(),
            PathBuf::from("/tmp/x"),
            SessionType::Implementation,
            Utc::now(),
        );
        assert!(session.invariants_hold());
        assert!(session.status.is_live());
        assert!(!session.status.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Idle,
            SessionStatus::Completed,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("bogus"), None);
    }
}

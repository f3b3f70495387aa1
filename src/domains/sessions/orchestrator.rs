//! `LifecycleOrchestrator`: Launch, Resume, Close, Reactivate, and
//! DeleteWorktree — the component the HTTP surface drives directly
//! (`spec.md` §4.2). Coordinates [`SessionStore`], [`WorktreeAdapter`],
//! and [`GitAdapter`]; the state-machine decision logic itself lives in
//! [`SessionStateMachine`] so this module stays orchestration, not
//! policy.

use super::branch_namer::BranchNamer;
use super::cleanup::StalePurge;
use super::entity::{AgentSession, Issue, IssueStatus, SessionStatus, SessionType};
use super::state_machine::{CloseTarget, IssueCascade, SessionStateMachine};
use super::store::SessionStore;
use crate::domains::git::adapter::GitAdapter;
use crate::domains::git::worktree_adapter::WorktreeAdapter;
use crate::errors::CoreError;
use chrono::Utc;
use log::{info, warn};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug)]
pub struct LaunchResult {
    pub session: AgentSession,
    pub command: String,
    /// True when this call resumed an existing idle session rather than
    /// creating a new one (`spec.md` §4.2 resume-on-launch guarantee).
    pub resumed: bool,
}

pub struct LifecycleOrchestrator<'a> {
    store: &'a dyn SessionStore,
    git_adapter: &'a dyn GitAdapter,
    worktree_adapter: &'a dyn WorktreeAdapter,
}

impl<'a> LifecycleOrchestrator<'a> {
    pub fn new(
        store: &'a dyn SessionStore,
        git_adapter: &'a dyn GitAdapter,
        worktree_adapter: &'a dyn WorktreeAdapter,
    ) -> Self {
        Self {
            store,
            git_adapter,
            worktree_adapter,
        }
    }

    pub fn launch(&self, project_id: &str, issue_ids: &[String]) -> Result<LaunchResult, CoreError> {
        if issue_ids.is_empty() {
            return Err(CoreError::validation("issue_ids", "must contain at least one issue id"));
        }

        let project = self.store.get_project(project_id)?;
        let issues: Vec<Issue> = issue_ids
            .iter()
            .map(|id| self.store.get_issue(id))
            .collect::<Result<_, _>>()?;

        let branch = self.derive_branch(&project.path, &issues[0].title);
        let worktree_path = canonical_worktree_path(&project.path, &branch);

        if let Some(existing) = self.store.find_live_session(project_id, &branch)? {
            if existing.status == SessionStatus::Idle {
                return self.resume_found(existing);
            }
            return Err(CoreError::conflict(format!(
                "session '{}' is already live on branch '{branch}'",
                existing.id
            )));
        }

        let purged = StalePurge::new(self.store).purge_stale_for_branch(project_id, &branch)?;
        if purged > 0 {
            info!("Launch: purged {purged} stale session(s) on branch '{branch}' before creating a new one");
        }

        self.worktree_adapter
            .create(&project.path, &branch, &worktree_path)
            .map_err(|err| CoreError::external("WorktreeAdapter::Create", err))?;

        let session = AgentSession::new_active(
            Uuid::now_v7().to_string(),
            project_id.to_string(),
            Some(issue_ids[0].clone()),
            branch.clone(),
            worktree_path.clone(),
            SessionType::Implementation,
            Utc::now(),
        );
        self.store.create_session(&session)?;

        for issue in &issues {
            let mut updated = issue.clone();
            updated.status = IssueStatus::InProgress;
            if let Err(err) = self.store.update_issue(&updated) {
                warn!("Launch: failed to cascade issue '{}' to in_progress: {err}", issue.id);
            }
        }

        let command = build_agent_command(&worktree_path, &issues);
        Ok(LaunchResult {
            session,
            command,
            resumed: false,
        })
    }

    fn resume_found(&self, mut session: AgentSession) -> Result<LaunchResult, CoreError> {
        let transition = SessionStateMachine::resume(&session, Utc::now())?;
        session.status = transition.new_status;
        session.last_active_at = Some(Utc::now());
        self.store.update_session(&session)?;

        let command = format!("cd {} && claude --resume", session.worktree_path.display());
        Ok(LaunchResult {
            session,
            command,
            resumed: true,
        })
    }

    /// Derives a branch name from `issue_title`, disambiguating against an
    /// existing dead branch of the same name (`spec.md` §9 supplemented
    /// surface) rather than silently reusing unrelated history.
    fn derive_branch(&self, repo_path: &std::path::Path, issue_title: &str) -> String {
        let candidate = BranchNamer::derive(issue_title);
        let existing_branches = self.git_adapter.branch_list(repo_path).unwrap_or_default();
        if !existing_branches.contains(&candidate) {
            return candidate;
        }

        let has_live_owner = self
            .store
            .list_sessions_by_status(
                "",
                &[SessionStatus::Active, SessionStatus::Idle],
                u32::MAX,
            )
            .unwrap_or_default()
            .iter()
            .any(|s| s.branch == candidate);

        if has_live_owner {
            // A live session legitimately owns this branch; the caller's
            // resume-on-launch path will find it via find_live_session.
            return candidate;
        }

        let suffix = Uuid::now_v7().simple().to_string()[..6].to_string();
        BranchNamer::with_collision_suffix(&candidate, &suffix)
    }

    pub fn resume(&self, session_id: &str) -> Result<AgentSession, CoreError> {
        let mut session = self.store.get_session(session_id)?;
        if session.status != SessionStatus::Idle {
            return Err(CoreError::conflict(format!(
                "cannot resume session '{session_id}' from status '{}'",
                session.status.as_str()
            )));
        }
        if !session.worktree_path.exists() {
            return Err(CoreError::precondition(
                "worktree no longer exists",
                vec![format!("{}", session.worktree_path.display())],
            ));
        }

        if let Err(err) = self.worktree_adapter.create(
            session.worktree_path.parent().unwrap_or(&session.worktree_path),
            &session.branch,
            &session.worktree_path,
        ) {
            warn!("Resume: re-attach worktree for '{session_id}' reported: {err}");
        }

        let transition = SessionStateMachine::resume(&session, Utc::now())?;
        session.status = transition.new_status;
        session.last_active_at = Some(Utc::now());
        self.store.update_session(&session)?;
        Ok(session)
    }

    pub fn close(&self, session_id: &str, target: CloseTarget) -> Result<AgentSession, CoreError> {
        let mut session = self.store.get_session(session_id)?;
        self.enrich_with_git_snapshot(&mut session);

        let now = Utc::now();
        let transition = SessionStateMachine::close(&session, target, now)?;
        session.status = transition.new_status;
        session.ended_at = transition.ended_at;

        if session.status.is_terminal() {
            if let Err(err) = self.worktree_adapter.close_terminal_window(&session.worktree_path) {
                warn!("Close: failed to close terminal window for '{session_id}': {err}");
            }
        }

        self.apply_cascade(&mut session, transition.cascade)?;
        self.store.update_session(&session)?;
        Ok(session)
    }

    pub fn reactivate(&self, session_id: &str) -> Result<AgentSession, CoreError> {
        let mut session = self.store.get_session(session_id)?;
        if session.worktree_path.as_os_str().is_empty() || !session.worktree_path.exists() {
            return Err(CoreError::precondition(
                "worktree path is unset or missing",
                vec![format!("{}", session.worktree_path.display())],
            ));
        }
        self.enrich_with_git_snapshot(&mut session);

        let transition = SessionStateMachine::reactivate(&session)?;
        session.status = transition.new_status;
        session.ended_at = transition.ended_at;
        self.apply_cascade(&mut session, transition.cascade)?;
        self.store.update_session(&session)?;
        Ok(session)
    }

    pub fn delete_worktree(&self, session_id: &str, force: bool) -> Result<AgentSession, CoreError> {
        let mut session = self.store.get_session(session_id)?;

        if !session.worktree_path.as_os_str().is_empty() {
            self.worktree_adapter
                .delete(
                    session.worktree_path.parent().unwrap_or(&session.worktree_path),
                    &session.branch,
                    &session.worktree_path,
                    force,
                )
                .map_err(|err| CoreError::external("WorktreeAdapter::Delete", err))?;
        }
        session.worktree_path = PathBuf::new();

        if !session.status.is_terminal() {
            let now = Utc::now();
            let transition = SessionStateMachine::delete_worktree(now);
            session.status = transition.new_status;
            session.ended_at = transition.ended_at;
        }

        self.store.update_session(&session)?;
        Ok(session)
    }

    /// Refreshes the git-derived snapshot fields (§3 invariant 6: hash,
    /// message, and ahead-count must be current on Close, Reactivate, and
    /// session-detail retrieval). Best-effort: a failed git call or a
    /// missing project record is logged and otherwise ignored, since this
    /// enrichment must never block the caller's primary operation.
    pub(crate) fn enrich_with_git_snapshot(&self, session: &mut AgentSession) {
        if session.worktree_path.as_os_str().is_empty() || !session.worktree_path.exists() {
            return;
        }
        match self.git_adapter.last_commit_hash(&session.worktree_path, &session.branch) {
            Ok(hash) => session.last_commit_hash = hash,
            Err(err) => debug_log_git_enrich_failure("LastCommitHash", &session.id, &err),
        }
        match self.git_adapter.last_commit_message(&session.worktree_path, &session.branch) {
            Ok(message) => session.last_commit_message = message,
            Err(err) => debug_log_git_enrich_failure("LastCommitMessage", &session.id, &err),
        }
        match self.store.get_project(&session.project_id) {
            Ok(project) => {
                match self
                    .git_adapter
                    .ahead_behind(&session.worktree_path, &project.base_branch, &session.branch)
                {
                    Ok(counts) => session.commit_count = counts.ahead as u32,
                    Err(err) => debug_log_git_enrich_failure("AheadBehind", &session.id, &err),
                }
            }
            Err(err) => log::debug!(
                "session detail enrichment: project lookup failed for '{}': {err}",
                session.id
            ),
        }
    }

    fn apply_cascade(&self, session: &mut AgentSession, cascade: IssueCascade) -> Result<(), CoreError> {
        let Some(issue_id) = session.issue_id.as_ref() else {
            return Ok(());
        };
        let new_status = match cascade {
            IssueCascade::None => return Ok(()),
            IssueCascade::SetStatus(status) => status,
            IssueCascade::Reopen => IssueStatus::Open,
        };

        let mut issue = self.store.get_issue(issue_id)?;
        issue.status = new_status;
        if matches!(cascade, IssueCascade::Reopen) {
            issue.closed_at = None;
        }
        self.store.update_issue(&issue)?;
        Ok(())
    }
}

fn debug_log_git_enrich_failure(operation: &str, session_id: &str, err: &anyhow::Error) {
    log::debug!("session detail enrichment: {operation} failed for '{session_id}': {err}");
}

/// `<project.path>.worktrees/<last-segment-of-branch>` (`spec.md` §6
/// on-disk layout rule).
pub fn canonical_worktree_path(project_path: &std::path::Path, branch: &str) -> PathBuf {
    let last_segment = branch.rsplit('/').next().unwrap_or(branch);
    let mut worktrees_root = project_path.as_os_str().to_os_string();
    worktrees_root.push(".worktrees");
    PathBuf::from(worktrees_root).join(last_segment)
}

fn build_agent_command(worktree_path: &std::path::Path, issues: &[Issue]) -> String {
    let refs: Vec<String> = issues
        .iter()
        .map(|issue| format!("#{}", short_id(&issue.id)))
        .collect();
    format!(
        "cd {} && claude \"Work on {}\"",
        worktree_path.display(),
        refs.join(", ")
    )
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::git::adapter::{AheadBehind, DiffStat};
    use crate::domains::git::worktree_adapter::WorktreeInfo;
    use crate::domains::sessions::entity::Project;
    use crate::domains::sessions::store::fakes::InMemorySessionStore;
    use std::path::Path;
    use std::sync::Mutex;

    pub(super) struct FakeGitAdapter {
        pub(super) branches: Vec<String>,
    }

    impl GitAdapter for FakeGitAdapter {
        fn current_branch(&self, _repo_path: &Path) -> anyhow::Result<String> {
            Ok("main".into())
        }
        fn is_dirty(&self, _repo_path: &Path) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn branch_list(&self, _repo_path: &Path) -> anyhow::Result<Vec<String>> {
            Ok(self.branches.clone())
        }
        fn worktree_list(&self, _repo_path: &Path) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn last_commit_date(&self, _repo_path: &Path, _branch: &str) -> anyhow::Result<Option<i64>> {
            Ok(None)
        }
        fn last_commit_hash(&self, _repo_path: &Path, _branch: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("abc123".into()))
        }
        fn last_commit_message(&self, _repo_path: &Path, _branch: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("fix things".into()))
        }
        fn latest_tag(&self, _repo_path: &Path) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        fn ahead_behind(&self, _repo_path: &Path, _base: &str, _branch: &str) -> anyhow::Result<AheadBehind> {
            Ok(AheadBehind::default())
        }
        fn diff_name_only(&self, _repo_path: &Path, _base: &str, _head: &str) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn diff(&self, _repo_path: &Path, _base: &str, _head: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
        fn diff_stat(&self, _repo_path: &Path, _base: &str, _head: &str) -> anyhow::Result<DiffStat> {
            Ok(DiffStat::default())
        }
        fn remote_url(&self, _repo_path: &Path) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    pub(super) struct FakeWorktreeAdapter {
        created: Mutex<Vec<(PathBuf, String)>>,
    }

    impl WorktreeAdapter for FakeWorktreeAdapter {
        fn create(&self, _repo_path: &Path, branch: &str, worktree_path: &Path) -> anyhow::Result<()> {
            self.created
                .lock()
                .unwrap()
                .push((worktree_path.to_path_buf(), branch.to_string()));
            Ok(())
        }
        fn list(&self, _repo_path: &Path) -> anyhow::Result<Vec<WorktreeInfo>> {
            Ok(Vec::new())
        }
        fn delete(&self, _repo_path: &Path, _branch: &str, _worktree_path: &Path, _force: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn close_terminal_window(&self, _worktree_path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn seed_project_and_issue(store: &InMemorySessionStore) {
        store.seed_project(Project {
            id: "p1".into(),
            path: PathBuf::from("/repo"),
            name: "repo".into(),
            base_branch: "main".into(),
        });
        store.seed_issue(Issue {
            id: "i1".into(),
            project_id: "p1".into(),
            title: "Fix BUG #123!".into(),
            status: IssueStatus::Open,
            closed_at: None,
        });
    }

    #[test]
    fn launch_creates_session_and_cascades_issue() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let result = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        assert!(!result.resumed);
        assert_eq!(result.session.branch, "feature/fix-bug-123");
        assert_eq!(
            result.session.worktree_path,
            PathBuf::from("/repo.worktrees/fix-bug-123")
        );
        assert_eq!(result.session.status, SessionStatus::Active);
        assert!(result.command.contains("cd /repo.worktrees/fix-bug-123"));

        let issue = store.get_issue("i1").unwrap();
        assert_eq!(issue.status, IssueStatus::InProgress);
    }

    #[test]
    fn launch_resumes_existing_idle_session_on_same_branch() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let first = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        orchestrator.close(&first.session.id, CloseTarget::Idle).unwrap();

        let second = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        assert!(second.resumed);
        assert_eq!(second.session.id, first.session.id);
        assert_eq!(second.session.status, SessionStatus::Active);
    }

    #[test]
    fn launch_rejects_empty_issue_list() {
        let store = InMemorySessionStore::new();
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let err = orchestrator.launch("p1", &[]).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn close_completed_cascades_issue_to_done() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        let closed = orchestrator
            .close(&launched.session.id, CloseTarget::Completed)
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert!(closed.ended_at.is_some());

        let issue = store.get_issue("i1").unwrap();
        assert_eq!(issue.status, IssueStatus::Done);
    }

    #[test]
    fn close_abandoned_reopens_issue_and_clears_closed_at() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        let mut issue = store.get_issue("i1").unwrap();
        issue.status = IssueStatus::Done;
        issue.closed_at = Some(Utc::now());
        store.update_issue(&issue).unwrap();

        orchestrator
            .close(&launched.session.id, CloseTarget::Abandoned)
            .unwrap();

        let issue = store.get_issue("i1").unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn reactivate_requires_existing_worktree() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        orchestrator
            .close(&launched.session.id, CloseTarget::Abandoned)
            .unwrap();

        // worktree_path still points at a directory that was never
        // actually created on disk by the fake adapter.
        let err = orchestrator.reactivate(&launched.session.id).unwrap_err();
        assert!(matches!(err, CoreError::Precondition { .. }));
    }

    #[test]
    fn delete_worktree_from_terminal_status_does_not_change_status() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        orchestrator
            .close(&launched.session.id, CloseTarget::Completed)
            .unwrap();

        let result = orchestrator.delete_worktree(&launched.session.id, true).unwrap();
        assert_eq!(result.status, SessionStatus::Completed);
        assert_eq!(result.worktree_path, PathBuf::new());
    }

    #[test]
    fn delete_worktree_from_live_status_transitions_to_abandoned() {
        let store = InMemorySessionStore::new();
        seed_project_and_issue(&store);
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        let result = orchestrator.delete_worktree(&launched.session.id, true).unwrap();
        assert_eq!(result.status, SessionStatus::Abandoned);
        assert!(result.ended_at.is_some());
    }
}

/// Narrative scenarios from spec.md §8, each walking the full lifecycle
/// through `LifecycleOrchestrator`, `Reconciler`, and `StalePurge`
/// together rather than one operation in isolation.
#[cfg(test)]
mod end_to_end {
    use super::tests::{FakeGitAdapter, FakeWorktreeAdapter};
    use super::*;
    use crate::domains::sessions::entity::{Issue, IssueStatus, Project, SessionType};
    use crate::domains::sessions::reconciler::Reconciler;
    use crate::domains::sessions::store::fakes::InMemorySessionStore;
    use chrono::Utc;
    use tempfile::TempDir;

    fn seed(store: &InMemorySessionStore, repo: &std::path::Path) {
        store.seed_project(Project {
            id: "p1".into(),
            path: repo.to_path_buf(),
            name: "repo".into(),
            base_branch: "main".into(),
        });
        store.seed_issue(Issue {
            id: "i1".into(),
            project_id: "p1".into(),
            title: "Add retry to webhook delivery".into(),
            status: IssueStatus::Open,
            closed_at: None,
        });
    }

    #[test]
    fn happy_path_launch_creates_an_active_session_on_a_derived_branch() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let result = orchestrator.launch("p1", &["i1".to_string()]).unwrap();

        assert!(!result.resumed);
        assert_eq!(result.session.status, SessionStatus::Active);
        assert_eq!(result.session.session_type, SessionType::Implementation);
        assert!(result.session.branch.starts_with("feature/"));
        assert!(result.command.contains("claude"));
        assert_eq!(store.get_issue("i1").unwrap().status, IssueStatus::InProgress);
    }

    #[test]
    fn pause_and_resume_round_trips_through_idle_back_to_active() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        // Give the session a worktree directory that really exists, since
        // resume checks the filesystem before re-attaching.
        std::fs::create_dir_all(&launched.session.worktree_path).unwrap();

        let paused = orchestrator
            .close(&launched.session.id, CloseTarget::Idle)
            .unwrap();
        assert_eq!(paused.status, SessionStatus::Idle);
        assert!(paused.ended_at.is_none(), "idle is not a terminal status");

        let resumed = orchestrator.resume(&launched.session.id).unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert!(resumed.last_active_at.is_some());

        // A second Launch against the same issue should now resume the
        // still-live session rather than creating a sibling.
        let relaunched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        assert!(relaunched.resumed);
        assert_eq!(relaunched.session.id, launched.session.id);
    }

    #[test]
    fn completing_a_session_cascades_its_issue_to_done_and_frees_the_branch() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        let completed = orchestrator
            .close(&launched.session.id, CloseTarget::Completed)
            .unwrap();

        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.ended_at.is_some());
        assert_eq!(store.get_issue("i1").unwrap().status, IssueStatus::Done);

        // The branch is free again: a fresh Launch for a new issue with the
        // same title derives the same branch name without colliding.
        store.seed_issue(Issue {
            id: "i2".into(),
            project_id: "p1".into(),
            title: "Add retry to webhook delivery".into(),
            status: IssueStatus::Open,
            closed_at: None,
        });
        let relaunched = orchestrator.launch("p1", &["i2".to_string()]).unwrap();
        assert_ne!(relaunched.session.id, launched.session.id);
        assert_eq!(relaunched.session.branch, launched.session.branch);
    }

    #[test]
    fn abandoning_a_session_reopens_its_issue_and_clears_the_worktree() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        orchestrator
            .close(&launched.session.id, CloseTarget::Abandoned)
            .unwrap();
        assert_eq!(store.get_issue("i1").unwrap().status, IssueStatus::Open);

        let deleted = orchestrator.delete_worktree(&launched.session.id, true).unwrap();
        assert_eq!(deleted.worktree_path, PathBuf::new());
        assert_eq!(deleted.status, SessionStatus::Abandoned);
    }

    #[test]
    fn reconciliation_sweep_demotes_and_recovers_sessions_across_a_batch() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        // FakeWorktreeAdapter::create never touches disk, so the launched
        // session's worktree path is already missing from the reconciler's
        // point of view.
        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        let live = store.get_session(&launched.session.id).unwrap();

        // A second, healthy session sharing the sweep whose directory
        // really exists should be left untouched in the same pass.
        let healthy_dir = TempDir::new().unwrap();
        let mut healthy = AgentSession::new_active(
            "s-healthy".into(),
            "p1".into(),
            None,
            "feature/healthy".into(),
            healthy_dir.path().to_path_buf(),
            SessionType::Implementation,
            Utc::now(),
        );
        healthy.status = SessionStatus::Active;
        store.create_session(&healthy).unwrap();

        let reconciler = Reconciler::new(&store, None);
        let reconciled = reconciler.reconcile(vec![live, healthy]);

        assert_eq!(reconciled[0].status, SessionStatus::Abandoned);
        assert!(reconciled[0].ended_at.is_some());
        assert_eq!(reconciled[1].status, SessionStatus::Active);
    }

    #[test]
    fn stale_purge_removes_only_immediately_aborted_launches() {
        let repo = TempDir::new().unwrap();
        let store = InMemorySessionStore::new();
        seed(&store, repo.path());
        let git = FakeGitAdapter { branches: vec![] };
        let worktree = FakeWorktreeAdapter::default();
        let orchestrator = LifecycleOrchestrator::new(&store, &git, &worktree);

        let launched = orchestrator.launch("p1", &["i1".to_string()]).unwrap();
        // Immediately abandoned with no commits: the stale signature.
        orchestrator
            .close(&launched.session.id, CloseTarget::Abandoned)
            .unwrap();

        // A second, unrelated session that has real commits on it must
        // survive the purge even though it is also abandoned.
        let mut productive = AgentSession::new_active(
            "s-productive".into(),
            "p1".into(),
            None,
            "feature/productive".into(),
            repo.path().join("other-worktree"),
            SessionType::Implementation,
            Utc::now(),
        );
        productive.status = SessionStatus::Abandoned;
        productive.ended_at = Some(Utc::now());
        productive.commit_count = 3;
        store.create_session(&productive).unwrap();

        let purge = StalePurge::new(&store);
        let deleted = purge.purge_stale().unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_session(&launched.session.id).is_err());
        assert!(store.get_session("s-productive").is_ok());
    }
}

//! `SessionStore`: the persistence contract the core consumes. Opaque to
//! the core beyond this trait — callers inject a SQLite-backed
//! implementation (`infrastructure::database::session_store`) in
//! production and an in-memory fake in tests, mirroring the teacher's
//! `CommandRunner`/`MockRunner` injection pattern.

use super::entity::{AgentSession, Issue, Project, SessionStatus};
use crate::errors::CoreError;
use std::path::Path;

/// Persistence contract for sessions, issues, and projects. Implementors
/// must be safe to call from a `tokio::task::spawn_blocking` closure.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, session: &AgentSession) -> Result<(), CoreError>;
    fn get_session(&self, id: &str) -> Result<AgentSession, CoreError>;
    fn get_session_by_worktree_path(&self, path: &Path) -> Result<AgentSession, CoreError>;
    /// Find a live (`active`/`idle`) session on `(project_id, branch)`, if
    /// any. Backs the resume-on-launch guarantee and invariant 3.
    fn find_live_session(
        &self,
        project_id: &str,
        branch: &str,
    ) -> Result<Option<AgentSession>, CoreError>;
    fn update_session(&self, session: &AgentSession) -> Result<(), CoreError>;
    /// Delete terminal sessions for `(project_id, branch)` whose worktree
    /// no longer exists. Returns the number deleted.
    fn delete_stale_sessions(&self, project_id: &str, branch: &str) -> Result<u64, CoreError>;
    /// Delete all terminal sessions across all projects whose worktree no
    /// longer exists. Returns the number deleted.
    fn delete_all_stale_sessions(&self) -> Result<u64, CoreError>;
    fn list_sessions(&self, project_id: &str, limit: u32) -> Result<Vec<AgentSession>, CoreError>;
    /// `project_id == ""` matches every project, for the background
    /// reconciliation tick and branch-collision checks that need every
    /// live session regardless of owner.
    fn list_sessions_by_status(
        &self,
        project_id: &str,
        statuses: &[SessionStatus],
        limit: u32,
    ) -> Result<Vec<AgentSession>, CoreError>;
    fn list_sessions_by_worktree_paths(
        &self,
        paths: &[std::path::PathBuf],
    ) -> Result<Vec<AgentSession>, CoreError>;

    fn get_issue(&self, id: &str) -> Result<Issue, CoreError>;
    fn update_issue(&self, issue: &Issue) -> Result<(), CoreError>;

    fn get_project(&self, id: &str) -> Result<Project, CoreError>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `SessionStore` for unit-testing the orchestrator,
    /// reconciler, discoverer, and stale-purge without a real database.
    #[derive(Default)]
    pub struct InMemorySessionStore {
        sessions: Mutex<HashMap<String, AgentSession>>,
        issues: Mutex<HashMap<String, Issue>>,
        projects: Mutex<HashMap<String, Project>>,
    }

    impl InMemorySessionStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_project(&self, project: Project) {
            self.projects.lock().unwrap().insert(project.id.clone(), project);
        }

        pub fn seed_issue(&self, issue: Issue) {
            self.issues.lock().unwrap().insert(issue.id.clone(), issue);
        }
    }

    impl SessionStore for InMemorySessionStore {
        fn create_session(&self, session: &AgentSession) -> Result<(), CoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&session.id) {
                return Err(CoreError::conflict(format!(
                    "session '{}' already exists",
                    session.id
                )));
            }
            sessions.insert(session.id.clone(), session.clone());
            Ok(())
        }

        fn get_session(&self, id: &str) -> Result<AgentSession, CoreError> {
            self.sessions
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("Session", id))
        }

        fn get_session_by_worktree_path(&self, path: &Path) -> Result<AgentSession, CoreError> {
            self.sessions
                .lock()
                .unwrap()
                .values()
                .find(|s| s.worktree_path == path)
                .cloned()
                .ok_or_else(|| CoreError::not_found("Session", path.display().to_string()))
        }

        fn find_live_session(
            &self,
            project_id: &str,
            branch: &str,
        ) -> Result<Option<AgentSession>, CoreError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .values()
                .find(|s| s.project_id == project_id && s.branch == branch && s.status.is_live())
                .cloned())
        }

        fn update_session(&self, session: &AgentSession) -> Result<(), CoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            if !sessions.contains_key(&session.id) {
                return Err(CoreError::not_found("Session", &session.id));
            }
            sessions.insert(session.id.clone(), session.clone());
            Ok(())
        }

        fn delete_stale_sessions(&self, project_id: &str, branch: &str) -> Result<u64, CoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            let before = sessions.len();
            sessions.retain(|_, s| {
                !(s.project_id == project_id && s.branch == branch && s.is_stale())
            });
            Ok((before - sessions.len()) as u64)
        }

        fn delete_all_stale_sessions(&self) -> Result<u64, CoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            let before = sessions.len();
            sessions.retain(|_, s| !s.is_stale());
            Ok((before - sessions.len()) as u64)
        }

        fn list_sessions(&self, project_id: &str, limit: u32) -> Result<Vec<AgentSession>, CoreError> {
            let mut out: Vec<_> = self
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.project_id == project_id)
                .cloned()
                .collect();
            out.sort_by(|a, b| a.id.cmp(&b.id));
            out.truncate(limit as usize);
            Ok(out)
        }

        fn list_sessions_by_status(
            &self,
            project_id: &str,
            statuses: &[SessionStatus],
            limit: u32,
        ) -> Result<Vec<AgentSession>, CoreError> {
            let mut out: Vec<_> = self
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| (project_id.is_empty() || s.project_id == project_id) && statuses.contains(&s.status))
                .cloned()
                .collect();
            out.sort_by(|a, b| a.id.cmp(&b.id));
            out.truncate(limit as usize);
            Ok(out)
        }

        fn list_sessions_by_worktree_paths(
            &self,
            paths: &[std::path::PathBuf],
        ) -> Result<Vec<AgentSession>, CoreError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| paths.contains(&s.worktree_path))
                .cloned()
                .collect())
        }

        fn get_issue(&self, id: &str) -> Result<Issue, CoreError> {
            self.issues
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("Issue", id))
        }

        fn update_issue(&self, issue: &Issue) -> Result<(), CoreError> {
            let mut issues = self.issues.lock().unwrap();
            if !issues.contains_key(&issue.id) {
                return Err(CoreError::not_found("Issue", &issue.id));
            }
            issues.insert(issue.id.clone(), issue.clone());
            Ok(())
        }

        fn get_project(&self, id: &str) -> Result<Project, CoreError> {
            self.projects
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("Project", id))
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        use super::super::entity::SessionType;
        use chrono::Utc;

        let store = InMemorySessionStore::new();
        let session = AgentSession::new_active(
            "s1".into(),
            "p1".into(),
            None,
            "feature/x".into(),
            std::path::PathBuf::from("/tmp/x"),
            SessionType::Implementation,
            Utc::now(),
        );
        store.create_session(&session).unwrap();
        let fetched = store.get_session("s1").unwrap();
        assert_eq!(fetched.branch, "feature/x");

        let err = store.get_session("missing").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn find_live_session_ignores_terminal_sessions() {
        use super::super::entity::SessionType;
        use chrono::Utc;

        let store = InMemorySessionStore::new();
        let mut session = AgentSession::new_active(
            "s1".into(),
            "p1".into(),
            None,
            "feature/x".into(),
            std::path::PathBuf::from("/tmp/x"),
            SessionType::Implementation,
            Utc::now(),
        );
        session.status = SessionStatus::Completed;
        session.ended_at = Some(Utc::now());
        store.create_session(&session).unwrap();

        assert!(store.find_live_session("p1", "feature/x").unwrap().is_none());
    }
}

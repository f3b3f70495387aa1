//! `Discoverer::Discover(project_id)` (`spec.md` §4.5). Adopts
//! pre-existing git worktrees that have no corresponding session record,
//! e.g. ones created outside this engine. Explicit-only: never runs as a
//! side effect of another operation.

use super::entity::{AgentSession, SessionStatus, SessionType};
use super::store::SessionStore;
use crate::domains::git::worktree_adapter::WorktreeAdapter;
use crate::errors::CoreError;
use chrono::Utc;
use log::info;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Discoverer<'a> {
    store: &'a dyn SessionStore,
    worktree_adapter: &'a dyn WorktreeAdapter,
}

impl<'a> Discoverer<'a> {
    pub fn new(store: &'a dyn SessionStore, worktree_adapter: &'a dyn WorktreeAdapter) -> Self {
        Self {
            store,
            worktree_adapter,
        }
    }

    pub fn discover(&self, project_id: &str) -> Result<Vec<AgentSession>, CoreError> {
        let project = self.store.get_project(project_id)?;

        let worktrees = self
            .worktree_adapter
            .list(&project.path)
            .map_err(|err| CoreError::external("WorktreeAdapter::List", err))?;

        let known_paths: std::collections::HashSet<PathBuf> = self
            .store
            .list_sessions(project_id, u32::MAX)?
            .into_iter()
            .map(|s| s.worktree_path)
            .collect();

        let mut created = Vec::new();
        for worktree in worktrees {
            if known_paths.contains(&worktree.path) {
                continue;
            }

            let session = AgentSession {
                id: Uuid::now_v7().to_string(),
                project_id: project_id.to_string(),
                issue_id: None,
                branch: worktree.name.clone(),
                worktree_path: worktree.path.clone(),
                status: SessionStatus::Idle,
                session_type: SessionType::Implementation,
                conflict_state: super::entity::ConflictState::None,
                conflict_files: Vec::new(),
                last_error: String::new(),
                last_sync_at: None,
                last_active_at: None,
                started_at: Utc::now(),
                ended_at: None,
                commit_count: 0,
                last_commit_hash: None,
                last_commit_message: None,
                discovered: true,
                review_attempt: 0,
            };

            self.store.create_session(&session)?;
            info!(
                "Discover: adopted worktree '{}' as session '{}'",
                worktree.path.display(),
                session.id
            );
            created.push(session);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::git::worktree_adapter::WorktreeInfo;
    use crate::domains::sessions::entity::Project;
    use crate::domains::sessions::store::fakes::InMemorySessionStore;

    struct FakeWorktreeAdapter {
        worktrees: Vec<WorktreeInfo>,
    }

    impl WorktreeAdapter for FakeWorktreeAdapter {
        fn create(&self, _repo_path: &std::path::Path, _branch: &str, _worktree_path: &std::path::Path) -> anyhow::Result<()> {
            Ok(())
        }
        fn list(&self, _repo_path: &std::path::Path) -> anyhow::Result<Vec<WorktreeInfo>> {
            Ok(self.worktrees.clone())
        }
        fn delete(&self, _repo_path: &std::path::Path, _branch: &str, _worktree_path: &std::path::Path, _force: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn close_terminal_window(&self, _worktree_path: &std::path::Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn discover_adopts_unknown_worktrees_only() {
        let store = InMemorySessionStore::new();
        store.seed_project(Project {
            id: "p1".into(),
            path: PathBuf::from("/repo"),
            name: "repo".into(),
            base_branch: "main".into(),
        });

        let existing = AgentSession::new_active(
            "existing".into(),
            "p1".into(),
            None,
            "feature/known".into(),
            PathBuf::from("/repo/.worktrees/known"),
            SessionType::Implementation,
            Utc::now(),
        );
        store.create_session(&existing).unwrap();

        let adapter = FakeWorktreeAdapter {
            worktrees: vec![
                WorktreeInfo {
                    name: "feature/known".into(),
                    path: PathBuf::from("/repo/.worktrees/known"),
                },
                WorktreeInfo {
                    name: "feature/unknown".into(),
                    path: PathBuf::from("/repo/.worktrees/unknown"),
                },
            ],
        };

        let discoverer = Discoverer::new(&store, &adapter);
        let created = discoverer.discover("p1").unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].branch, "feature/unknown");
        assert!(created[0].discovered);
        assert_eq!(created[0].status, SessionStatus::Idle);
    }

    #[test]
    fn discover_on_unknown_project_fails_not_found() {
        let store = InMemorySessionStore::new();
        let adapter = FakeWorktreeAdapter { worktrees: vec![] };
        let discoverer = Discoverer::new(&store, &adapter);
        let err = discoverer.discover("missing").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}

//! `EngineService`: the async facade the HTTP layer drives. Owns the
//! production adapters and hands short-lived borrows of them to the pure
//! domain components (`LifecycleOrchestrator`, `Reconciler`, `Discoverer`,
//! `StalePurge`, `SyncMergeEngine`) inside `spawn_blocking`, since `git2`
//! and filesystem calls are synchronous. Emits an [`EngineEvent`] after
//! every state-changing call, mirroring the teacher's command handlers
//! calling `emit_event` right after the domain call returns.

use std::path::PathBuf;
use std::sync::Arc;

use crate::domains::git::adapter::{Git2Adapter, GitAdapter};
use crate::domains::git::github_adapter::GitHubAdapter;
use crate::domains::git::process_detector::{ProcessDetector, SystemProcessDetector};
use crate::domains::git::worktree_adapter::{Git2WorktreeAdapter, WorktreeAdapter};
use crate::domains::merge::{MergeOptions, MergeOutcome, SyncMergeEngine, SyncOptions, SyncOutcome};
use crate::domains::sessions::cleanup::StalePurge;
use crate::domains::sessions::discoverer::Discoverer;
use crate::domains::sessions::entity::AgentSession;
use crate::domains::sessions::orchestrator::{LaunchResult, LifecycleOrchestrator};
use crate::domains::sessions::reconciler::Reconciler;
use crate::domains::sessions::state_machine::CloseTarget;
use crate::domains::sessions::store::SessionStore;
use crate::errors::CoreError;
use crate::infrastructure::database::{Database, SqliteSessionStore};
use crate::infrastructure::events::{EngineEvent, EventBus};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CloseCheck {
    pub ready_to_close: bool,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct EngineService {
    store: Arc<dyn SessionStore>,
    git_adapter: Arc<dyn GitAdapter>,
    worktree_adapter: Arc<dyn WorktreeAdapter>,
    process_detector: Arc<dyn ProcessDetector>,
    github_adapter: Arc<GitHubAdapter>,
    pub events: EventBus,
}

impl EngineService {
    pub fn new(db: Database, events: EventBus) -> Self {
        Self {
            store: Arc::new(SqliteSessionStore::new(db)),
            git_adapter: Arc::new(Git2Adapter::new()),
            worktree_adapter: Arc::new(Git2WorktreeAdapter::new()),
            process_detector: Arc::new(SystemProcessDetector::new()),
            github_adapter: Arc::new(GitHubAdapter::system()),
            events,
        }
    }

    pub async fn launch(&self, project_id: String, issue_ids: Vec<String>) -> Result<LaunchResult, CoreError> {
        let (store, git, worktree, events) = self.clones();
        run_blocking(move || {
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            let result = orchestrator.launch(&project_id, &issue_ids)?;
            events.emit(EngineEvent::SessionLaunched {
                session_id: result.session.id.clone(),
                branch: result.session.branch.clone(),
            });
            Ok(result)
        })
        .await
    }

    pub async fn resume(&self, session_id: String) -> Result<AgentSession, CoreError> {
        let (store, git, worktree, events) = self.clones();
        run_blocking(move || {
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            let session = orchestrator.resume(&session_id)?;
            events.emit(EngineEvent::SessionResumed { session_id: session.id.clone() });
            Ok(session)
        })
        .await
    }

    pub async fn close(&self, session_id: String, target: CloseTarget) -> Result<AgentSession, CoreError> {
        let (store, git, worktree, events) = self.clones();
        run_blocking(move || {
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            let session = orchestrator.close(&session_id, target)?;
            events.emit(EngineEvent::SessionClosed {
                session_id: session.id.clone(),
                status: session.status.as_str().to_string(),
            });
            Ok(session)
        })
        .await
    }

    pub async fn reactivate(&self, session_id: String) -> Result<AgentSession, CoreError> {
        let (store, git, worktree, events) = self.clones();
        run_blocking(move || {
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            let session = orchestrator.reactivate(&session_id)?;
            events.emit(EngineEvent::SessionReactivated { session_id: session.id.clone() });
            Ok(session)
        })
        .await
    }

    pub async fn delete_worktree(&self, session_id: String, force: bool) -> Result<AgentSession, CoreError> {
        let (store, git, worktree, events) = self.clones();
        run_blocking(move || {
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            let session = orchestrator.delete_worktree(&session_id, force)?;
            events.emit(EngineEvent::WorktreeDeleted { session_id: session.id.clone() });
            Ok(session)
        })
        .await
    }

    pub async fn sync(
        &self,
        session_id: String,
        base_branch: String,
        opts: SyncOptions,
    ) -> Result<SyncOutcome, CoreError> {
        let store = self.store.clone();
        let git = self.git_adapter.clone();
        let worktree = self.worktree_adapter.clone();
        let events = self.events.clone();
        run_blocking(move || {
            let mut session = store.get_session(&session_id)?;
            let engine = SyncMergeEngine::new(git.as_ref(), worktree.as_ref(), store.as_ref(), None);
            let outcome = engine.sync(&mut session, &base_branch, &opts)?;
            store.update_session(&session)?;
            if outcome.conflict {
                events.emit(EngineEvent::ConflictRecorded {
                    session_id: session.id.clone(),
                    files: outcome.conflict_files.clone(),
                });
            } else {
                events.emit(EngineEvent::SyncCompleted { session_id: session.id.clone() });
            }
            Ok(outcome)
        })
        .await
    }

    pub async fn merge(
        &self,
        session_id: String,
        repo_path: PathBuf,
        base_branch: String,
        pr_repository: Option<String>,
        opts: MergeOptions,
    ) -> Result<MergeOutcome, CoreError> {
        let store = self.store.clone();
        let git = self.git_adapter.clone();
        let worktree = self.worktree_adapter.clone();
        let github = self.github_adapter.clone();
        let events = self.events.clone();
        run_blocking(move || {
            let mut session = store.get_session(&session_id)?;
            let engine = SyncMergeEngine::new(git.as_ref(), worktree.as_ref(), store.as_ref(), Some(github.as_ref()));
            let outcome = engine.merge(
                &mut session,
                &repo_path,
                &base_branch,
                pr_repository.as_deref(),
                &opts,
            )?;
            store.update_session(&session)?;
            match &outcome {
                MergeOutcome::Merged { .. } | MergeOutcome::PullRequestCreated { .. } => {
                    events.emit(EngineEvent::MergeCompleted { session_id: session.id.clone() });
                }
                MergeOutcome::Conflict { files } => {
                    events.emit(EngineEvent::ConflictRecorded {
                        session_id: session.id.clone(),
                        files: files.clone(),
                    });
                }
            }
            Ok(outcome)
        })
        .await
    }

    pub async fn discover(&self, project_id: String) -> Result<Vec<AgentSession>, CoreError> {
        let store = self.store.clone();
        let worktree = self.worktree_adapter.clone();
        let events = self.events.clone();
        run_blocking(move || {
            let discoverer = Discoverer::new(store.as_ref(), worktree.as_ref());
            let discovered = discoverer.discover(&project_id)?;
            events.emit(EngineEvent::SessionsDiscovered {
                project_id,
                count: discovered.len(),
            });
            Ok(discovered)
        })
        .await
    }

    pub async fn purge_stale(&self) -> Result<u64, CoreError> {
        let store = self.store.clone();
        let events = self.events.clone();
        run_blocking(move || {
            let purge = StalePurge::new(store.as_ref());
            let count = purge.purge_stale()?;
            events.emit(EngineEvent::StalePurgeCompleted { count });
            Ok(count)
        })
        .await
    }

    /// `project_id == ""` lists across every project. `statuses` empty
    /// means every status (`spec.md` §6: `GET /sessions?status=a,b`).
    pub async fn list_sessions(
        &self,
        project_id: String,
        statuses: Vec<crate::domains::sessions::entity::SessionStatus>,
        limit: u32,
    ) -> Result<Vec<AgentSession>, CoreError> {
        use crate::domains::sessions::entity::SessionStatus;
        let store = self.store.clone();
        let detector = self.process_detector.clone();
        run_blocking(move || {
            let statuses = if statuses.is_empty() {
                vec![
                    SessionStatus::Active,
                    SessionStatus::Idle,
                    SessionStatus::Completed,
                    SessionStatus::Abandoned,
                ]
            } else {
                statuses
            };
            let batch = store.list_sessions_by_status(&project_id, &statuses, limit)?;
            let reconciler = Reconciler::new(store.as_ref(), Some(detector.as_ref()));
            Ok(reconciler.reconcile(batch))
        })
        .await
    }

    pub async fn get_session(&self, session_id: String) -> Result<AgentSession, CoreError> {
        let (store, git, worktree, _events) = self.clones();
        run_blocking(move || {
            let mut session = store.get_session(&session_id)?;
            let orchestrator = LifecycleOrchestrator::new(store.as_ref(), git.as_ref(), worktree.as_ref());
            orchestrator.enrich_with_git_snapshot(&mut session);
            Ok(session)
        })
        .await
    }

    /// `GET /sessions/{id}/close-check` advisory.
    pub async fn close_check(&self, session_id: String) -> Result<CloseCheck, CoreError> {
        let store = self.store.clone();
        let git = self.git_adapter.clone();
        run_blocking(move || {
            let session = store.get_session(&session_id)?;
            let mut warnings = Vec::new();

            if session.conflict_state != crate::domains::sessions::entity::ConflictState::None {
                warnings.push(format!(
                    "session has an unresolved {}",
                    session.conflict_state.as_str()
                ));
            }

            if !session.worktree_path.as_os_str().is_empty() && session.worktree_path.exists() {
                match git.is_dirty(&session.worktree_path) {
                    Ok(true) => warnings.push("worktree has uncommitted changes".to_string()),
                    Ok(false) => {}
                    Err(err) => warnings.push(format!("could not check worktree status: {err}")),
                }
            }

            Ok(CloseCheck {
                ready_to_close: warnings.is_empty(),
                warnings,
            })
        })
        .await
    }

    /// Runs one reconciliation pass over every live session, for the
    /// background tick loop in `startup.rs`.
    pub async fn reconcile_tick(&self) -> Result<usize, CoreError> {
        let store = self.store.clone();
        let detector = self.process_detector.clone();
        let events = self.events.clone();
        run_blocking(move || {
            use crate::domains::sessions::entity::SessionStatus;
            let live = store.list_sessions_by_status(
                "",
                &[SessionStatus::Active, SessionStatus::Idle],
                u32::MAX,
            )?;
            let count = live.len();
            let reconciler = Reconciler::new(store.as_ref(), Some(detector.as_ref()));
            reconciler.reconcile(live);
            events.emit(EngineEvent::ReconciliationTick { reconciled: count });
            Ok(count)
        })
        .await
    }

    fn clones(&self) -> (Arc<dyn SessionStore>, Arc<dyn GitAdapter>, Arc<dyn WorktreeAdapter>, EventBus) {
        (
            self.store.clone(),
            self.git_adapter.clone(),
            self.worktree_adapter.clone(),
            self.events.clone(),
        )
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(CoreError::external("spawn_blocking", join_err)),
    }
}

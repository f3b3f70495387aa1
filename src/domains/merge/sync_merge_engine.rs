//! `SyncMergeEngine`: Sync (`spec.md` §4.4, bullet 1) and Merge (bullet 2),
//! the component that actually integrates a feature branch with its base.
//! Conflict simulation and rebase mechanics mirror the teacher's
//! `domains/merge/service.rs` (`compute_merge_state`, `rebase_session_branch`)
//! closely enough to reuse its exact libgit2 call sequence, generalized from
//! a single hardcoded session shape to the `(repo_path, base, head)` triple
//! this engine's callers supply.

use crate::domains::git::adapter::GitAdapter;
use crate::domains::git::github_adapter::GitHubAdapter;
use crate::domains::git::worktree_adapter::WorktreeAdapter;
use crate::domains::sessions::entity::{AgentSession, ConflictState, IssueStatus};
use crate::domains::sessions::state_machine::{CloseTarget, IssueCascade, SessionStateMachine};
use crate::domains::sessions::store::SessionStore;
use crate::errors::CoreError;
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use git2::{BranchType, ErrorCode, MergeOptions as Git2MergeOptions, Repository, build::CheckoutBuilder};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

/// Matches the teacher's `CONFLICT_SAMPLE_LIMIT`: conflict file lists are
/// capped so the session row and HTTP payload stay bounded (`spec.md` §9
/// supplemented surface).
const CONFLICT_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub rebase: bool,
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub integrated: bool,
    pub conflict: bool,
    pub conflict_files: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub base: Option<String>,
    pub rebase: bool,
    pub create_pr: bool,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    pub pr_draft: bool,
    pub force: bool,
    pub dry_run: bool,
    pub cleanup: bool,
}

impl MergeOptions {
    pub fn local() -> Self {
        Self {
            cleanup: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum MergeOutcome {
    /// Local merge/rebase completed; `cleaned_up` reflects whether the
    /// worktree/branch/terminal teardown ran.
    Merged { cleaned_up: bool },
    /// PR path: session remains live, no cleanup performed.
    PullRequestCreated { url: String },
    Conflict { files: Vec<String> },
}

pub struct SyncMergeEngine<'a> {
    git_adapter: &'a dyn GitAdapter,
    worktree_adapter: &'a dyn WorktreeAdapter,
    store: &'a dyn SessionStore,
    github_adapter: Option<&'a GitHubAdapter>,
}

impl<'a> SyncMergeEngine<'a> {
    pub fn new(
        git_adapter: &'a dyn GitAdapter,
        worktree_adapter: &'a dyn WorktreeAdapter,
        store: &'a dyn SessionStore,
        github_adapter: Option<&'a GitHubAdapter>,
    ) -> Self {
        Self {
            git_adapter,
            worktree_adapter,
            store,
            github_adapter,
        }
    }

    /// Applies the issue-cascade half of a `SessionStateMachine` transition.
    /// Mirrors `LifecycleOrchestrator::apply_cascade` since `Merge`'s
    /// completed-transition needs the same issue write the orchestrator's
    /// `Close` does.
    fn apply_issue_cascade(&self, session: &AgentSession, cascade: IssueCascade) -> Result<(), CoreError> {
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

    /// `Sync(session, opts)`. Mutates `session` in place: clears or sets
    /// `conflict_state`/`conflict_files`/`last_error`, stamps
    /// `last_sync_at` on success.
    pub fn sync(
        &self,
        session: &mut AgentSession,
        base_branch: &str,
        opts: &SyncOptions,
    ) -> Result<SyncOutcome, CoreError> {
        if !session.status.is_live() {
            return Err(CoreError::conflict(format!(
                "cannot sync session '{}' in status '{}'",
                session.id,
                session.status.as_str()
            )));
        }
        if !session.worktree_path.exists() {
            return Err(CoreError::precondition(
                "worktree does not exist",
                vec![format!("{}", session.worktree_path.display())],
            ));
        }

        if !opts.force {
            let dirty = self
                .git_adapter
                .is_dirty(&session.worktree_path)
                .map_err(|err| CoreError::external("GitAdapter::IsDirty", err))?;
            if dirty {
                return Err(CoreError::precondition(
                    "worktree has uncommitted changes",
                    vec!["pass force=true to sync anyway".to_string()],
                ));
            }
        }

        fetch_remote_best_effort(&session.worktree_path);

        if opts.dry_run {
            return Ok(SyncOutcome {
                integrated: false,
                conflict: false,
                conflict_files: Vec::new(),
            });
        }

        match apply_base_into_head(&session.worktree_path, base_branch, opts.rebase) {
            Ok(ApplyResult::UpToDate) => {
                session.conflict_state = ConflictState::None;
                session.conflict_files.clear();
                session.last_error.clear();
                session.last_sync_at = Some(Utc::now());
                Ok(SyncOutcome {
                    integrated: false,
                    conflict: false,
                    conflict_files: Vec::new(),
                })
            }
            Ok(ApplyResult::Integrated) => {
                session.conflict_state = ConflictState::None;
                session.conflict_files.clear();
                session.last_error.clear();
                session.last_sync_at = Some(Utc::now());
                Ok(SyncOutcome {
                    integrated: true,
                    conflict: false,
                    conflict_files: Vec::new(),
                })
            }
            Err(ApplyError::Conflict(files)) => {
                session.conflict_state = ConflictState::SyncConflict;
                session.conflict_files = files.clone();
                session.last_error = format!("sync conflict in {} file(s)", files.len());
                Ok(SyncOutcome {
                    integrated: false,
                    conflict: true,
                    conflict_files: files,
                })
            }
            Err(ApplyError::Other(err)) => Err(CoreError::external("SyncMergeEngine::Sync", err)),
        }
    }

    /// `Merge(session, opts)`.
    pub fn merge(
        &self,
        session: &mut AgentSession,
        repo_path: &Path,
        base_branch: &str,
        pr_repository: Option<&str>,
        opts: &MergeOptions,
    ) -> Result<MergeOutcome, CoreError> {
        if !session.status.is_live() {
            return Err(CoreError::conflict(format!(
                "cannot merge session '{}' in status '{}'",
                session.id,
                session.status.as_str()
            )));
        }
        if !session.worktree_path.exists() {
            return Err(CoreError::precondition(
                "worktree does not exist",
                vec![format!("{}", session.worktree_path.display())],
            ));
        }

        if !opts.force {
            let dirty = self
                .git_adapter
                .is_dirty(&session.worktree_path)
                .map_err(|err| CoreError::external("GitAdapter::IsDirty", err))?;
            if dirty {
                return Err(CoreError::precondition(
                    "worktree has uncommitted changes",
                    vec!["pass force=true to merge anyway".to_string()],
                ));
            }
        }

        if opts.dry_run {
            return Ok(MergeOutcome::Merged { cleaned_up: false });
        }

        if opts.create_pr {
            let github = self
                .github_adapter
                .ok_or_else(|| CoreError::external("SyncMergeEngine::Merge", "no GitHub adapter configured"))?;
            github
                .push_branch(&session.worktree_path, &session.branch)
                .map_err(|err| CoreError::external("GitHubAdapter::PushBranch", err))?;
            let url = github
                .create_pull_request(&session.worktree_path, &session.branch, pr_repository)
                .map_err(|err| CoreError::external("GitHubAdapter::CreatePullRequest", err))?;
            return Ok(MergeOutcome::PullRequestCreated { url });
        }

        let base = opts.base.as_deref().unwrap_or(base_branch);
        match merge_feature_into_base(repo_path, &session.branch, base, opts.rebase) {
            Ok(()) => {
                session.conflict_state = ConflictState::None;
                session.conflict_files.clear();
                session.last_error.clear();

                let cleaned_up = if opts.cleanup {
                    if let Err(err) = self.worktree_adapter.delete(
                        repo_path,
                        &session.branch,
                        &session.worktree_path,
                        true,
                    ) {
                        warn!("merge cleanup: failed to delete worktree for '{}': {err}", session.id);
                    }
                    if let Err(err) = self.worktree_adapter.close_terminal_window(&session.worktree_path) {
                        warn!("merge cleanup: failed to close terminal window for '{}': {err}", session.id);
                    }
                    session.worktree_path = std::path::PathBuf::new();

                    // §4.4: a cleaned-up local merge retires the session,
                    // cascading its implementation issue to `done`. The PR
                    // path above returns early and never reaches here, so
                    // that session stays live as required.
                    let transition = SessionStateMachine::close(session, CloseTarget::Completed, Utc::now())?;
                    session.status = transition.new_status;
                    session.ended_at = transition.ended_at;
                    self.apply_issue_cascade(session, transition.cascade)?;

                    true
                } else {
                    false
                };

                info!("Merged session '{}' branch '{}' into '{base}'", session.id, session.branch);
                Ok(MergeOutcome::Merged { cleaned_up })
            }
            Err(ApplyError::Conflict(files)) => {
                session.conflict_state = ConflictState::MergeConflict;
                session.conflict_files = files.clone();
                session.last_error = format!("merge conflict in {} file(s)", files.len());
                Ok(MergeOutcome::Conflict { files })
            }
            Err(ApplyError::Other(err)) => Err(CoreError::external("SyncMergeEngine::Merge", err)),
        }
    }
}

enum ApplyResult {
    UpToDate,
    Integrated,
}

enum ApplyError {
    Conflict(Vec<String>),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for ApplyError {
    fn from(err: anyhow::Error) -> Self {
        ApplyError::Other(err)
    }
}

impl From<git2::Error> for ApplyError {
    fn from(err: git2::Error) -> Self {
        ApplyError::Other(err.into())
    }
}

fn fetch_remote_best_effort(repo_path: &Path) {
    let Ok(repo) = Repository::open(repo_path) else {
        return;
    };
    let Ok(mut remote) = repo.find_remote("origin") else {
        debug!("no 'origin' remote for {}; skipping fetch", repo_path.display());
        return;
    };
    if let Err(err) = remote.fetch::<&str>(&[], None, None) {
        warn!("best-effort fetch failed for {}: {err}", repo_path.display());
    }
}

/// Applies `base` into the current HEAD of the repository at `repo_path`,
/// either by merge or by rebase. Used both by Sync (feature branch pulling
/// in the base) and Merge's local-merge path (base branch pulling in the
/// feature branch, called with repo_path = the main repo and the feature
/// branch checked out as a detached ref via the commit id).
fn apply_base_into_head(repo_path: &Path, base: &str, rebase: bool) -> Result<ApplyResult, ApplyError> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;

    let head_oid = repo.head()?.peel_to_commit()?.id();
    let base_oid = resolve_commit_oid(&repo, base)?;

    if head_oid == base_oid {
        return Ok(ApplyResult::UpToDate);
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.push(base_oid)?;
    revwalk.hide(head_oid).ok();
    if revwalk.next().is_none() {
        return Ok(ApplyResult::UpToDate);
    }

    if rebase {
        rebase_onto(&repo, base)?;
    } else {
        merge_commit(&repo, head_oid, base_oid, base)?;
    }
    Ok(ApplyResult::Integrated)
}

fn merge_feature_into_base(
    repo_path: &Path,
    feature_branch: &str,
    base_branch: &str,
    rebase: bool,
) -> Result<(), ApplyError> {
    let repo = Repository::open(repo_path)
        .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;

    let base_oid = resolve_commit_oid(&repo, base_branch)?;
    let feature_oid = resolve_commit_oid(&repo, feature_branch)?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push(feature_oid)?;
    revwalk.hide(base_oid).ok();
    if revwalk.next().is_none() {
        debug!("branch '{feature_branch}' has no commits beyond '{base_branch}'; nothing to merge");
        return Ok(());
    }

    if rebase {
        checkout_branch(&repo, feature_branch)?;
        rebase_onto(&repo, base_branch)?;
        checkout_branch(&repo, base_branch)?;
        fast_forward_to(&repo, base_branch, feature_branch)?;
    } else {
        checkout_branch(&repo, base_branch)?;
        merge_commit(&repo, base_oid, feature_oid, feature_branch)?;
    }
    Ok(())
}

fn resolve_commit_oid(repo: &Repository, reference: &str) -> Result<git2::Oid> {
    if let Ok(branch) = repo.find_branch(reference, BranchType::Local) {
        return Ok(branch.get().peel_to_commit()?.id());
    }
    let obj = repo.revparse_single(reference)?;
    Ok(obj.peel_to_commit()?.id())
}

fn checkout_branch(repo: &Repository, branch: &str) -> Result<()> {
    let (object, reference) = repo.revparse_ext(branch)?;
    repo.checkout_tree(&object, None)?;
    match reference {
        Some(r) => repo.set_head(r.name().unwrap_or(branch)),
        None => repo.set_head_detached(object.id()),
    }?;
    Ok(())
}

fn fast_forward_to(repo: &Repository, target_branch: &str, source_branch: &str) -> Result<()> {
    let source_oid = resolve_commit_oid(repo, source_branch)?;
    let mut branch_ref = repo.find_reference(&format!("refs/heads/{target_branch}"))?;
    branch_ref.set_target(source_oid, "fast-forward merge")?;
    repo.set_head(&format!("refs/heads/{target_branch}"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    Ok(())
}

fn merge_commit(
    repo: &Repository,
    head_oid: git2::Oid,
    other_oid: git2::Oid,
    other_name: &str,
) -> Result<(), ApplyError> {
    let head_commit = repo.find_commit(head_oid)?;
    let other_commit = repo.find_commit(other_oid)?;

    let mut merge_opts = Git2MergeOptions::new();
    merge_opts.fail_on_conflict(false);

    let mut index = repo.merge_commits(&head_commit, &other_commit, Some(&merge_opts))?;
    if index.has_conflicts() {
        return Err(ApplyError::Conflict(collect_conflicting_paths(&index)?));
    }

    let tree_oid = index.write_tree_to(repo)?;
    let tree = repo.find_tree(tree_oid)?;
    let sig = repo
        .signature()
        .or_else(|_| git2::Signature::now("fleetwright", "fleetwright@local"))?;
    let message = format!("Merge '{other_name}'");
    let new_commit_oid = repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &message,
        &tree,
        &[&head_commit, &other_commit],
    )?;
    let _ = new_commit_oid;

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    Ok(())
}

fn rebase_onto(repo: &Repository, onto: &str) -> Result<(), ApplyError> {
    let head = repo.head()?;
    let annotated_head = repo.reference_to_annotated_commit(&head)?;

    let onto_oid = resolve_commit_oid(repo, onto)?;
    let annotated_onto = repo.find_annotated_commit(onto_oid)?;

    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    checkout.allow_conflicts(true);

    let mut rebase_opts = git2::RebaseOptions::new();
    rebase_opts.checkout_options(checkout);

    let mut rebase = repo.rebase(
        Some(&annotated_head),
        Some(&annotated_onto),
        None,
        Some(&mut rebase_opts),
    )?;

    while let Some(op_result) = rebase.next() {
        op_result?;

        let index = repo.index()?;
        if index.has_conflicts() {
            let conflicts = collect_conflicting_paths(&index)?;
            let _ = rebase.abort();
            return Err(ApplyError::Conflict(conflicts));
        }

        let sig = repo
        .signature()
        .or_else(|_| git2::Signature::now("fleetwright", "fleetwright@local"))?;
        if let Err(err) = rebase.commit(None, &sig, None) {
            if err.code() == ErrorCode::Applied {
                continue;
            }
            let conflicts = repo
                .index()
                .ok()
                .filter(|index| index.has_conflicts())
                .and_then(|index| collect_conflicting_paths(&index).ok())
                .unwrap_or_default();
            let _ = rebase.abort();
            if !conflicts.is_empty() {
                return Err(ApplyError::Conflict(conflicts));
            }
            return Err(anyhow!("rebase commit failed: {err}").into());
        }
    }

    match repo.signature() {
        Ok(sig) => rebase.finish(Some(&sig))?,
        Err(_) => rebase.finish(None)?,
    }

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    Ok(())
}

fn collect_conflicting_paths(index: &git2::Index) -> Result<Vec<String>> {
    let mut seen = std::collections::BTreeSet::new();
    let mut conflicts_iter = index.conflicts().context("failed to read merge conflicts")?;

    for conflict in conflicts_iter.by_ref() {
        let conflict = conflict?;
        let path = conflict
            .our
            .as_ref()
            .and_then(index_entry_path)
            .or_else(|| conflict.their.as_ref().and_then(index_entry_path))
            .or_else(|| conflict.ancestor.as_ref().and_then(index_entry_path));

        if let Some(path) = path {
            if seen.len() < CONFLICT_SAMPLE_LIMIT {
                seen.insert(path);
            }
            if seen.len() == CONFLICT_SAMPLE_LIMIT {
                break;
            }
        }
    }

    Ok(seen.into_iter().collect())
}

fn index_entry_path(entry: &git2::IndexEntry) -> Option<String> {
    std::str::from_utf8(&entry.path).ok().map(|s| s.to_string())
}

//! `GitAdapter`: the capability contract the core consumes for all
//! repository introspection. `Git2Adapter` is the production
//! implementation, backed by `git2` (vendored libgit2), following the
//! teacher's convention of opening a fresh `Repository` handle per call
//! rather than caching one across calls.

use anyhow::{Context, Result};
use git2::{BranchType, DiffOptions, Repository};
use log::{debug, warn};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AheadBehind {
    pub ahead: usize,
    pub behind: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Operations on a repository path. Every method takes the repository
/// root explicitly rather than binding to one at construction, matching
/// how the teacher's free functions in `domains/git` take `repo_path`.
pub trait GitAdapter: Send + Sync {
    fn current_branch(&self, repo_path: &Path) -> Result<String>;
    fn is_dirty(&self, repo_path: &Path) -> Result<bool>;
    fn branch_list(&self, repo_path: &Path) -> Result<Vec<String>>;
    fn worktree_list(&self, repo_path: &Path) -> Result<Vec<String>>;
    fn last_commit_date(&self, repo_path: &Path, branch: &str) -> Result<Option<i64>>;
    fn last_commit_hash(&self, repo_path: &Path, branch: &str) -> Result<Option<String>>;
    fn last_commit_message(&self, repo_path: &Path, branch: &str) -> Result<Option<String>>;
    fn latest_tag(&self, repo_path: &Path) -> Result<Option<String>>;
    fn ahead_behind(&self, repo_path: &Path, base: &str, branch: &str) -> Result<AheadBehind>;
    fn diff_name_only(&self, repo_path: &Path, base: &str, head: &str) -> Result<Vec<String>>;
    fn diff(&self, repo_path: &Path, base: &str, head: &str) -> Result<String>;
    fn diff_stat(&self, repo_path: &Path, base: &str, head: &str) -> Result<DiffStat>;
    fn remote_url(&self, repo_path: &Path) -> Result<Option<String>>;
}

pub struct Git2Adapter;

impl Git2Adapter {
    pub fn new() -> Self {
        Self
    }

    fn resolve_commit<'r>(
        repo: &'r Repository,
        reference: &str,
    ) -> Result<git2::Commit<'r>> {
        if let Ok(branch) = repo.find_branch(reference, BranchType::Local) {
            return branch
                .get()
                .peel_to_commit()
                .with_context(|| format!("failed to peel local branch '{reference}' to a commit"));
        }
        let remote_ref = format!("refs/remotes/origin/{reference}");
        if let Ok(reference_obj) = repo.find_reference(&remote_ref) {
            return reference_obj
                .peel_to_commit()
                .with_context(|| format!("failed to peel remote branch '{reference}' to a commit"));
        }
        let obj = repo
            .revparse_single(reference)
            .with_context(|| format!("failed to resolve revision '{reference}'"))?;
        obj.peel_to_commit()
            .with_context(|| format!("revision '{reference}' does not point to a commit"))
    }
}

impl Default for Git2Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GitAdapter for Git2Adapter {
    fn current_branch(&self, repo_path: &Path) -> Result<String> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let head = repo.head().context("repository has no HEAD")?;
        if head.is_branch() {
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        } else {
            Ok("HEAD".to_string())
        }
    }

    fn is_dirty(&self, repo_path: &Path) -> Result<bool> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    fn branch_list(&self, repo_path: &Path) -> Result<Vec<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let mut names = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))?.flatten() {
            if let Some(name) = entry.0.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        names.dedup();
        debug!("Found {} local branches in {}", names.len(), repo_path.display());
        Ok(names)
    }

    fn worktree_list(&self, repo_path: &Path) -> Result<Vec<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let names = repo
            .worktrees()?
            .iter()
            .flatten()
            .map(|s| s.to_string())
            .collect();
        Ok(names)
    }

    fn last_commit_date(&self, repo_path: &Path, branch: &str) -> Result<Option<i64>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        match Self::resolve_commit(&repo, branch) {
            Ok(commit) => Ok(Some(commit.time().seconds())),
            Err(err) => {
                debug!("last_commit_date: {err:#}");
                Ok(None)
            }
        }
    }

    fn last_commit_hash(&self, repo_path: &Path, branch: &str) -> Result<Option<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        match Self::resolve_commit(&repo, branch) {
            Ok(commit) => Ok(Some(commit.id().to_string())),
            Err(err) => {
                debug!("last_commit_hash: {err:#}");
                Ok(None)
            }
        }
    }

    fn last_commit_message(&self, repo_path: &Path, branch: &str) -> Result<Option<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        match Self::resolve_commit(&repo, branch) {
            Ok(commit) => Ok(commit.summary().map(|s| s.to_string())),
            Err(err) => {
                debug!("last_commit_message: {err:#}");
                Ok(None)
            }
        }
    }

    fn latest_tag(&self, repo_path: &Path) -> Result<Option<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let tags = repo.tag_names(None)?;
        Ok(tags.iter().flatten().last().map(|s| s.to_string()))
    }

    fn ahead_behind(&self, repo_path: &Path, base: &str, branch: &str) -> Result<AheadBehind> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let base_commit = Self::resolve_commit(&repo, base)?;
        let branch_commit = Self::resolve_commit(&repo, branch)?;
        let (ahead, behind) = repo.graph_ahead_behind(branch_commit.id(), base_commit.id())?;
        Ok(AheadBehind { ahead, behind })
    }

    fn diff_name_only(&self, repo_path: &Path, base: &str, head: &str) -> Result<Vec<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let base_tree = Self::resolve_commit(&repo, base)?.tree()?;
        let head_tree = Self::resolve_commit(&repo, head)?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;
        let mut paths = Vec::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                paths.push(path.to_string_lossy().to_string());
            }
        }
        Ok(paths)
    }

    fn diff(&self, repo_path: &Path, base: &str, head: &str) -> Result<String> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let base_tree = Self::resolve_commit(&repo, base)?.tree()?;
        let head_tree = Self::resolve_commit(&repo, head)?.tree()?;
        let mut opts = DiffOptions::new();
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), Some(&mut opts))?;
        let mut out = Vec::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            out.extend_from_slice(line.content());
            true
        })?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn diff_stat(&self, repo_path: &Path, base: &str, head: &str) -> Result<DiffStat> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        let base_tree = Self::resolve_commit(&repo, base)?.tree()?;
        let head_tree = Self::resolve_commit(&repo, head)?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;
        let stats = diff.stats()?;
        Ok(DiffStat {
            files_changed: stats.files_changed(),
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        })
    }

    fn remote_url(&self, repo_path: &Path) -> Result<Option<String>> {
        let repo = Repository::open(repo_path)
            .with_context(|| format!("failed to open repository at {}", repo_path.display()))?;
        match repo.find_remote("origin") {
            Ok(remote) => Ok(remote.url().map(|s| s.to_string())),
            Err(err) => {
                warn!("no 'origin' remote for {}: {err}", repo_path.display());
                Ok(None)
            }
        }
    }
}

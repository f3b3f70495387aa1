//! `ProcessDetector::IsClaudeRunning` (`spec.md` §6). Optional capability:
//! the core operates correctly without it (Reconciler treats a detector
//! error the same as "no process found", per §4.3). Implemented with
//! `sysinfo`, matching the process-inspection idiom in `Wirasm-shards`'
//! `process::operations` module (refresh-then-scan, one `System` per
//! call rather than a long-lived cache).

use std::path::Path;
use sysinfo::{ProcessesToUpdate, System};

pub trait ProcessDetector: Send + Sync {
    /// True if a process whose current working directory is
    /// `worktree_path` (or a descendant of it) appears to be an active
    /// coding-agent session.
    fn is_claude_running(&self, worktree_path: &Path) -> bool;
}

pub struct SystemProcessDetector;

impl SystemProcessDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemProcessDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDetector for SystemProcessDetector {
    fn is_claude_running(&self, worktree_path: &Path) -> bool {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let target = worktree_path
            .canonicalize()
            .unwrap_or_else(|_| worktree_path.to_path_buf());

        system.processes().values().any(|process| {
            process
                .cwd()
                .map(|cwd| path_is_or_is_under(cwd, &target))
                .unwrap_or(false)
        })
    }
}

fn path_is_or_is_under(cwd: &Path, target: &Path) -> bool {
    cwd == target || cwd.starts_with(target)
}

/// Always-negative detector for deployments without process introspection
/// (e.g. restricted containers). `spec.md` §6 calls the detector optional.
pub struct NullProcessDetector;

impl ProcessDetector for NullProcessDetector {
    fn is_claude_running(&self, _worktree_path: &Path) -> bool {
        false
    }
}

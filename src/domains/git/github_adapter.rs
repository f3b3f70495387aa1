//! PR creation via the `gh` CLI, injected through a `CommandRunner` trait
//! so the `SyncMergeEngine`'s PR-backed merge path is testable without
//! shelling out. Mirrors the teacher's `domains/git/github_cli.rs`
//! `CommandRunner`/`SystemCommandRunner` split, trimmed to the single
//! operation this engine needs (`spec.md` §5 Open Questions: PR creation
//! backend is `gh` via `CommandRunner`).

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::io;
use std::path::Path;
use std::process::Command as StdCommand;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.unwrap_or(-1) == 0
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        current_dir: Option<&Path>,
        env: &[(&str, &str)],
    ) -> io::Result<CommandOutput>;
}

pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        current_dir: Option<&Path>,
        env: &[(&str, &str)],
    ) -> io::Result<CommandOutput> {
        let mut cmd = StdCommand::new(program);
        cmd.args(args);
        if let Some(dir) = current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        let output = cmd.output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Push the branch and open (or reuse) a pull request against the
/// project's default remote, driven entirely through `CommandRunner` so
/// tests can inject a `MockRunner` instead of shelling out.
pub struct GitHubAdapter {
    runner: Box<dyn CommandRunner>,
}

impl GitHubAdapter {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemCommandRunner))
    }

    pub fn push_branch(&self, worktree_path: &Path, branch_name: &str) -> Result<()> {
        let env = [("GIT_TERMINAL_PROMPT", "0")];
        let output = self
            .runner
            .run("git", &["push"], Some(worktree_path), &env)
            .context("failed to invoke git push")?;
        if output.success() {
            debug!("pushed branch '{branch_name}'");
            return Ok(());
        }

        let retry = self
            .runner
            .run(
                "git",
                &["push", "--set-upstream", "origin", branch_name],
                Some(worktree_path),
                &env,
            )
            .context("failed to invoke git push --set-upstream")?;
        if retry.success() {
            debug!("pushed branch '{branch_name}' with upstream configuration");
            return Ok(());
        }

        Err(anyhow!(
            "git push failed for branch '{branch_name}': {}",
            retry.stderr
        ))
    }

    pub fn create_pull_request(
        &self,
        worktree_path: &Path,
        branch_name: &str,
        repository: Option<&str>,
    ) -> Result<String> {
        let env = [("GH_PROMPT_DISABLED", "1"), ("NO_COLOR", "1")];
        let mut args = vec!["pr", "create", "--fill", "--head", branch_name];
        if let Some(repo) = repository {
            args.push("--repo");
            args.push(repo);
        }

        let output = self
            .runner
            .run("gh", &args, Some(worktree_path), &env)
            .context("failed to invoke gh pr create")?;

        if !output.success() {
            if let Some(existing) = self.view_existing_pr(worktree_path, branch_name, repository)? {
                info!("reusing existing PR for branch '{branch_name}': {existing}");
                return Ok(existing);
            }
            return Err(anyhow!(
                "gh pr create failed for branch '{branch_name}': {}",
                output.stderr
            ));
        }

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        extract_pr_url(&combined).ok_or_else(|| anyhow!("gh pr create did not report a PR URL"))
    }

    fn view_existing_pr(
        &self,
        worktree_path: &Path,
        branch_name: &str,
        repository: Option<&str>,
    ) -> Result<Option<String>> {
        let env = [("GH_PROMPT_DISABLED", "1"), ("NO_COLOR", "1")];
        let mut args = vec!["pr", "view", branch_name, "--json", "url"];
        if let Some(repo) = repository {
            args.push("--repo");
            args.push(repo);
        }

        let output = self
            .runner
            .run("gh", &args, Some(worktree_path), &env)
            .context("failed to invoke gh pr view")?;
        if !output.success() {
            return Ok(None);
        }

        #[derive(serde::Deserialize)]
        struct PrView {
            url: String,
        }
        let parsed: PrView = serde_json::from_str(output.stdout.trim())
            .context("failed to parse gh pr view JSON output")?;
        Ok(Some(parsed.url))
    }
}

fn extract_pr_url(text: &str) -> Option<String> {
    for token in text.split_whitespace() {
        let cleaned = token.trim_matches(|c: char| "()[]{}<>,.;".contains(c));
        if cleaned.starts_with("https://github.com/") && cleaned.contains("/pull/") {
            return Some(cleaned.to_string());
        }
    }
    None
}

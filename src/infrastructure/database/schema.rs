//! Table definitions for the engine's own persistence, consolidated into
//! one `initialize_schema` call the way the teacher's `db_schema.rs` does
//! it — every `CREATE TABLE IF NOT EXISTS` plus its indexes in one place,
//! run once at startup.

use super::connection::Database;
use anyhow::Result;

pub fn initialize_schema(db: &Database) -> Result<()> {
    let conn = db.get_conn()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            base_branch TEXT NOT NULL DEFAULT 'main'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS issues (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            closed_at INTEGER,
            FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            issue_id TEXT,
            branch TEXT NOT NULL,
            worktree_path TEXT NOT NULL,
            status TEXT NOT NULL,
            session_type TEXT NOT NULL DEFAULT 'implementation',
            conflict_state TEXT NOT NULL DEFAULT 'none',
            conflict_files TEXT NOT NULL DEFAULT '[]',
            last_error TEXT NOT NULL DEFAULT '',
            last_sync_at INTEGER,
            last_active_at INTEGER,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            commit_count INTEGER NOT NULL DEFAULT 0,
            last_commit_hash TEXT,
            last_commit_message TEXT,
            discovered BOOLEAN NOT NULL DEFAULT FALSE,
            review_attempt INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE,
            FOREIGN KEY(issue_id) REFERENCES issues(id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(project_id, status)",
        [],
    )?;
    // Partial: worktree_path is cleared to "" by DeleteWorktree, and more
    // than one session can have an empty path at once.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_worktree_path
            ON sessions(worktree_path) WHERE worktree_path <> ''",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_project_branch ON sessions(project_id, branch)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_schema_is_idempotent() {
        let db = Database::new_in_memory().unwrap();
        initialize_schema(&db).unwrap();
        initialize_schema(&db).unwrap();
    }
}

//! SQLite-backed [`SessionStore`]. Production implementation injected into
//! [`crate::domains::sessions::orchestrator::LifecycleOrchestrator`] and
//! friends; the in-memory fake in `domains::sessions::store::fakes` covers
//! unit tests.

use super::connection::Database;
use super::timestamps::{utc_from_epoch_seconds_lossy, utc_from_epoch_seconds_lossy_opt};
use crate::domains::sessions::entity::{
    AgentSession, ConflictState, Issue, IssueStatus, Project, SessionStatus, SessionType,
};
use crate::domains::sessions::store::SessionStore;
use crate::errors::CoreError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn to_epoch(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn to_epoch_opt(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp())
}

fn row_to_session(row: &Row) -> rusqlite::Result<AgentSession> {
    let status_str: String = row.get("status")?;
    let session_type_str: String = row.get("session_type")?;
    let conflict_state_str: String = row.get("conflict_state")?;
    let conflict_files_json: String = row.get("conflict_files")?;
    let started_at: i64 = row.get("started_at")?;
    let ended_at: Option<i64> = row.get("ended_at")?;
    let last_sync_at: Option<i64> = row.get("last_sync_at")?;
    let last_active_at: Option<i64> = row.get("last_active_at")?;
    let worktree_path: String = row.get("worktree_path")?;

    Ok(AgentSession {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        issue_id: row.get("issue_id")?,
        branch: row.get("branch")?,
        worktree_path: PathBuf::from(worktree_path),
        status: SessionStatus::parse(&status_str).unwrap_or(SessionStatus::Abandoned),
        session_type: SessionType::parse(&session_type_str).unwrap_or(SessionType::Implementation),
        conflict_state: ConflictState::parse(&conflict_state_str).unwrap_or_default(),
        conflict_files: serde_json::from_str(&conflict_files_json).unwrap_or_default(),
        last_error: row.get("last_error")?,
        last_sync_at: last_sync_at.map(utc_from_epoch_seconds_lossy),
        last_active_at: last_active_at.map(utc_from_epoch_seconds_lossy),
        started_at: utc_from_epoch_seconds_lossy(started_at),
        ended_at: utc_from_epoch_seconds_lossy_opt(ended_at),
        commit_count: row.get::<_, i64>("commit_count")? as u32,
        last_commit_hash: row.get("last_commit_hash")?,
        last_commit_message: row.get("last_commit_message")?,
        discovered: row.get("discovered")?,
        review_attempt: row.get::<_, i64>("review_attempt")? as u32,
    })
}

fn bind_session_params(session: &AgentSession) -> rusqlite::Result<Vec<(&'static str, Box<dyn rusqlite::ToSql>)>> {
    let conflict_files_json = serde_json::to_string(&session.conflict_files)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    Ok(vec![
        (":id", Box::new(session.id.clone())),
        (":project_id", Box::new(session.project_id.clone())),
        (":issue_id", Box::new(session.issue_id.clone())),
        (":branch", Box::new(session.branch.clone())),
        (
            ":worktree_path",
            Box::new(session.worktree_path.to_string_lossy().to_string()),
        ),
        (":status", Box::new(session.status.as_str().to_string())),
        (":session_type", Box::new(session.session_type.as_str().to_string())),
        (":conflict_state", Box::new(session.conflict_state.as_str().to_string())),
        (":conflict_files", Box::new(conflict_files_json)),
        (":last_error", Box::new(session.last_error.clone())),
        (":last_sync_at", Box::new(to_epoch_opt(session.last_sync_at))),
        (":last_active_at", Box::new(to_epoch_opt(session.last_active_at))),
        (":started_at", Box::new(to_epoch(session.started_at))),
        (":ended_at", Box::new(to_epoch_opt(session.ended_at))),
        (":commit_count", Box::new(session.commit_count as i64)),
        (":last_commit_hash", Box::new(session.last_commit_hash.clone())),
        (":last_commit_message", Box::new(session.last_commit_message.clone())),
        (":discovered", Box::new(session.discovered)),
        (":review_attempt", Box::new(session.review_attempt as i64)),
    ])
}

fn row_to_issue(row: &Row) -> rusqlite::Result<Issue> {
    let status_str: String = row.get("status")?;
    let closed_at: Option<i64> = row.get("closed_at")?;
    Ok(Issue {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        status: IssueStatus::parse(&status_str).unwrap_or(IssueStatus::Open),
        closed_at: closed_at.map(utc_from_epoch_seconds_lossy),
    })
}

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    let path: String = row.get("path")?;
    Ok(Project {
        id: row.get("id")?,
        path: PathBuf::from(path),
        name: row.get("name")?,
        base_branch: row.get("base_branch")?,
    })
}

fn map_lookup_err(entity: &str, id: &str, err: rusqlite::Error) -> CoreError {
    CoreError::from_store_lookup(entity, id, err)
}

impl SessionStore for SqliteSessionStore {
    fn create_session(&self, session: &AgentSession) -> Result<(), CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let values = bind_session_params(session).map_err(CoreError::database)?;
        let named: Vec<(&str, &dyn rusqlite::ToSql)> =
            values.iter().map(|(k, v)| (*k, v.as_ref())).collect();
        conn.execute(
            "INSERT INTO sessions (
                id, project_id, issue_id, branch, worktree_path, status, session_type,
                conflict_state, conflict_files, last_error, last_sync_at, last_active_at,
                started_at, ended_at, commit_count, last_commit_hash, last_commit_message,
                discovered, review_attempt
            ) VALUES (
                :id, :project_id, :issue_id, :branch, :worktree_path, :status, :session_type,
                :conflict_state, :conflict_files, :last_error, :last_sync_at, :last_active_at,
                :started_at, :ended_at, :commit_count, :last_commit_hash, :last_commit_message,
                :discovered, :review_attempt
            )",
            named.as_slice(),
        )
        .map_err(|err| {
            if is_unique_violation(&err) {
                CoreError::conflict(format!("session '{}' already exists", session.id))
            } else {
                CoreError::database(err)
            }
        })?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<AgentSession, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id], row_to_session)
            .optional()
            .map_err(CoreError::database)?
            .ok_or_else(|| CoreError::not_found("Session", id))
    }

    fn get_session_by_worktree_path(&self, path: &Path) -> Result<AgentSession, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let path_str = path.to_string_lossy().to_string();
        conn.query_row(
            "SELECT * FROM sessions WHERE worktree_path = ?1",
            params![path_str],
            row_to_session,
        )
        .optional()
        .map_err(CoreError::database)?
        .ok_or_else(|| CoreError::not_found("Session", path.display().to_string()))
    }

    fn find_live_session(
        &self,
        project_id: &str,
        branch: &str,
    ) -> Result<Option<AgentSession>, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        conn.query_row(
            "SELECT * FROM sessions
                WHERE project_id = ?1 AND branch = ?2 AND status IN ('active', 'idle')",
            params![project_id, branch],
            row_to_session,
        )
        .optional()
        .map_err(CoreError::database)
    }

    fn update_session(&self, session: &AgentSession) -> Result<(), CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let values = bind_session_params(session).map_err(CoreError::database)?;
        let named: Vec<(&str, &dyn rusqlite::ToSql)> =
            values.iter().map(|(k, v)| (*k, v.as_ref())).collect();
        let affected = conn
            .execute(
                "UPDATE sessions SET
                    project_id = :project_id, issue_id = :issue_id, branch = :branch,
                    worktree_path = :worktree_path, status = :status, session_type = :session_type,
                    conflict_state = :conflict_state, conflict_files = :conflict_files,
                    last_error = :last_error, last_sync_at = :last_sync_at,
                    last_active_at = :last_active_at, started_at = :started_at,
                    ended_at = :ended_at, commit_count = :commit_count,
                    last_commit_hash = :last_commit_hash, last_commit_message = :last_commit_message,
                    discovered = :discovered, review_attempt = :review_attempt
                WHERE id = :id",
                named.as_slice(),
            )
            .map_err(|err| map_lookup_err("Session", &session.id, err))?;
        if affected == 0 {
            return Err(CoreError::not_found("Session", &session.id));
        }
        Ok(())
    }

    fn delete_stale_sessions(&self, project_id: &str, branch: &str) -> Result<u64, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let affected = conn
            .execute(
                "DELETE FROM sessions
                    WHERE project_id = ?1 AND branch = ?2 AND status = 'abandoned'
                      AND commit_count = 0 AND ended_at IS NOT NULL
                      AND (ended_at - started_at) < 60",
                params![project_id, branch],
            )
            .map_err(CoreError::database)?;
        Ok(affected as u64)
    }

    fn delete_all_stale_sessions(&self) -> Result<u64, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let affected = conn
            .execute(
                "DELETE FROM sessions
                    WHERE status = 'abandoned' AND commit_count = 0 AND ended_at IS NOT NULL
                      AND (ended_at - started_at) < 60",
                [],
            )
            .map_err(CoreError::database)?;
        Ok(affected as u64)
    }

    fn list_sessions(&self, project_id: &str, limit: u32) -> Result<Vec<AgentSession>, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE project_id = ?1 ORDER BY id LIMIT ?2")
            .map_err(CoreError::database)?;
        let rows = stmt
            .query_map(params![project_id, limit], row_to_session)
            .map_err(CoreError::database)?;
        rows.collect::<Result<_, _>>().map_err(CoreError::database)
    }

    fn list_sessions_by_status(
        &self,
        project_id: &str,
        statuses: &[SessionStatus],
        limit: u32,
    ) -> Result<Vec<AgentSession>, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let placeholders: Vec<String> = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect();
        let project_filter = if project_id.is_empty() {
            "1 = 1".to_string()
        } else {
            "project_id = ?1".to_string()
        };
        let sql = format!(
            "SELECT * FROM sessions WHERE {project_filter} AND status IN ({}) ORDER BY id LIMIT {limit}",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql).map_err(CoreError::database)?;
        let status_strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&project_id];
        for s in &status_strs {
            bound.push(s);
        }
        let rows = stmt
            .query_map(bound.as_slice(), row_to_session)
            .map_err(CoreError::database)?;
        rows.collect::<Result<_, _>>().map_err(CoreError::database)
    }

    fn list_sessions_by_worktree_paths(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<AgentSession>, CoreError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let placeholders: Vec<String> = (1..=paths.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT * FROM sessions WHERE worktree_path IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql).map_err(CoreError::database)?;
        let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
        let bound: Vec<&dyn rusqlite::ToSql> =
            path_strs.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(bound.as_slice(), row_to_session)
            .map_err(CoreError::database)?;
        rows.collect::<Result<_, _>>().map_err(CoreError::database)
    }

    fn get_issue(&self, id: &str) -> Result<Issue, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        conn.query_row("SELECT * FROM issues WHERE id = ?1", params![id], row_to_issue)
            .optional()
            .map_err(CoreError::database)?
            .ok_or_else(|| CoreError::not_found("Issue", id))
    }

    fn update_issue(&self, issue: &Issue) -> Result<(), CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        let affected = conn
            .execute(
                "UPDATE issues SET title = ?1, status = ?2, closed_at = ?3 WHERE id = ?4",
                params![
                    issue.title,
                    issue.status.as_str(),
                    to_epoch_opt(issue.closed_at),
                    issue.id
                ],
            )
            .map_err(|err| map_lookup_err("Issue", &issue.id, err))?;
        if affected == 0 {
            return Err(CoreError::not_found("Issue", &issue.id));
        }
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Project, CoreError> {
        let conn = self.db.get_conn().map_err(CoreError::database)?;
        conn.query_row("SELECT * FROM projects WHERE id = ?1", params![id], row_to_project)
            .optional()
            .map_err(CoreError::database)?
            .ok_or_else(|| CoreError::not_found("Project", id))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Direct project/issue seeding used by discovery and the HTTP layer's
/// project-registration surface; not part of the `SessionStore` contract
/// since callers outside the lifecycle engine own project/issue creation.
pub fn insert_project(conn: &Connection, project: &Project) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO projects (id, path, name, base_branch) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET path = excluded.path, name = excluded.name,
                base_branch = excluded.base_branch",
        params![
            project.id,
            project.path.to_string_lossy().to_string(),
            project.name,
            project.base_branch
        ],
    )?;
    Ok(())
}

pub fn insert_issue(conn: &Connection, issue: &Issue) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO issues (id, project_id, title, status, closed_at) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title, status = excluded.status,
                closed_at = excluded.closed_at",
        params![
            issue.id,
            issue.project_id,
            issue.title,
            issue.status.as_str(),
            to_epoch_opt(issue.closed_at)
        ],
    )?;
    Ok(())
}

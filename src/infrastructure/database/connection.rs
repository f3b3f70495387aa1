//! SQLite connection pool. A thin `r2d2`/`r2d2_sqlite` wrapper, matching
//! the teacher's `Database` handle: cheap to clone callers hold a
//! `&Database` and call `get_conn()` per operation rather than threading a
//! single connection through the call stack.

use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type PooledConn = PooledConnection<SqliteConnectionManager>;

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .context("failed to build sqlite connection pool")?;
        let db = Self { pool };
        db.get_conn()?.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .context("failed to build in-memory sqlite connection pool")?;
        Ok(Self { pool })
    }

    pub fn get_conn(&self) -> Result<PooledConn> {
        self.pool.get().context("failed to check out a pooled sqlite connection")
    }

    /// Default path when the caller doesn't override it via config/CLI:
    /// `$DATA_DIR/fleetwright/fleetwright.db`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fleetwright")
            .join("fleetwright.db")
    }
}

fn init_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_database_opens_and_serves_connections() {
        let db = Database::new_in_memory().unwrap();
        let conn = db.get_conn().unwrap();
        let result: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(result, 1);
    }
}

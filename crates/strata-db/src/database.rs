use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use strata_common::{Error, Result};
use tracing::info;

use crate::migrations::{
    LedgerEntry, MigrationLedger, MigrationRunner, MigrationStatus, RunReport, schema, versions,
};

/// Handle to the bot's SQLite database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    /// Apply every pending unit of the shipped registry. Call once at
    /// startup; an error means the process must not start serving.
    pub fn run_migrations(&self) -> Result<RunReport> {
        self.run_migrations_with(&MigrationRunner::new(versions::registry()))
    }

    pub fn run_migrations_with(&self, runner: &MigrationRunner) -> Result<RunReport> {
        let mut conn = self.connection()?;
        Ok(runner.run(&mut conn)?)
    }

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        let conn = self.connection()?;
        Ok(MigrationRunner::new(versions::registry()).status(&conn)?)
    }

    /// Ledger entries, most recently applied first. Empty before the first run.
    pub fn migration_history(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.connection()?;
        if !schema::table_exists(&conn, crate::migrations::LEDGER_TABLE)
            .map_err(|e| Error::Database(format!("failed to inspect schema: {e}")))?
        {
            return Ok(Vec::new());
        }
        Ok(MigrationLedger::new().history(&conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_migrations_builds_the_bot_schema() {
        let db = Database::in_memory().unwrap();
        let report = db.run_migrations().unwrap();

        assert_eq!(report.applied_count(), 4);
        assert_eq!(db.migration_history().unwrap().len(), 4);
    }

    #[test]
    fn history_is_empty_before_first_run() {
        let db = Database::in_memory().unwrap();
        assert!(db.migration_history().unwrap().is_empty());

        let status = db.migration_status().unwrap();
        assert!(status.applied.is_empty());
        assert_eq!(status.pending.len(), 4);
    }

    #[test]
    fn status_after_run_has_nothing_pending() {
        let db = Database::in_memory().unwrap();
        db.run_migrations().unwrap();

        let status = db.migration_status().unwrap();
        assert!(status.pending.is_empty());
        assert_eq!(status.applied[0].version, "20241201_000001");
    }

    #[test]
    fn reopening_a_file_database_skips_applied_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("bot.db");

        {
            let db = Database::open(&path, Duration::from_secs(1)).unwrap();
            assert_eq!(db.run_migrations().unwrap().applied_count(), 4);
        }

        let db = Database::open(&path, Duration::from_secs(1)).unwrap();
        let report = db.run_migrations().unwrap();
        assert!(report.is_noop());
        assert_eq!(db.migration_history().unwrap().len(), 4);
    }

    #[test]
    fn migration_failures_surface_as_migration_errors() {
        let db = Database::in_memory().unwrap();
        {
            let conn = db.connection().unwrap();
            // A users table the migrations cannot rebuild around
            conn.execute_batch("CREATE VIEW users AS SELECT 1 AS id;")
                .unwrap();
        }

        let err = db.run_migrations().unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
        assert!(db.migration_history().unwrap().is_empty());
    }
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ffi, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{MigrationError, schema};

pub const LEDGER_TABLE: &str = "migration_history";

const CREATE_LEDGER_SQL: &str = "
CREATE TABLE migration_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version VARCHAR(20) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL,
    description TEXT,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    execution_time REAL
);";

/// A row of `migration_history`. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub applied_at: DateTime<Utc>,
    /// Seconds spent in the unit's upgrade.
    pub execution_time: Option<f64>,
}

/// Append-only record of applied migration versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationLedger;

impl MigrationLedger {
    pub fn new() -> Self {
        Self
    }

    /// Create the ledger table unless it already exists. Returns `true` when
    /// this call created it.
    pub fn ensure_table(&self, conn: &Connection) -> Result<bool, MigrationError> {
        let exists = schema::table_exists(conn, LEDGER_TABLE).map_err(|e| {
            MigrationError::LedgerBootstrap(format!("failed to inspect schema: {e}"))
        })?;
        if exists {
            debug!("{LEDGER_TABLE} table present");
            return Ok(false);
        }

        conn.execute_batch(CREATE_LEDGER_SQL).map_err(|e| {
            MigrationError::LedgerBootstrap(format!("failed to create {LEDGER_TABLE}: {e}"))
        })?;
        info!("created {LEDGER_TABLE} table");
        Ok(true)
    }

    pub fn applied_versions(&self, conn: &Connection) -> Result<HashSet<String>, MigrationError> {
        let mut stmt = conn
            .prepare("SELECT version FROM migration_history")
            .map_err(|e| MigrationError::Ledger(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| MigrationError::Ledger(format!("failed to query versions: {e}")))?;

        let mut versions = HashSet::new();
        for row in rows {
            versions.insert(
                row.map_err(|e| MigrationError::Ledger(format!("failed to read version: {e}")))?,
            );
        }
        Ok(versions)
    }

    /// Append one entry. A version that is already recorded is an error.
    pub fn record(
        &self,
        conn: &Connection,
        version: &str,
        name: &str,
        description: Option<&str>,
        execution_time: Option<f64>,
    ) -> Result<(), MigrationError> {
        conn.execute(
            "INSERT INTO migration_history (version, name, description, execution_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![version, name, description, execution_time],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                MigrationError::Ledger(format!("version {version} is already recorded"))
            }
            _ => MigrationError::Ledger(format!("failed to record {version}: {e}")),
        })?;
        Ok(())
    }

    /// All entries in version order.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.select(conn, "ORDER BY version ASC")
    }

    /// All entries, most recently applied first.
    pub fn history(&self, conn: &Connection) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.select(conn, "ORDER BY applied_at DESC, id DESC")
    }

    fn select(&self, conn: &Connection, order: &str) -> Result<Vec<LedgerEntry>, MigrationError> {
        let sql = format!(
            "SELECT id, version, name, description, applied_at, execution_time
             FROM migration_history {order}"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| MigrationError::Ledger(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                ))
            })
            .map_err(|e| MigrationError::Ledger(format!("failed to query entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, version, name, description, applied_at, execution_time) =
                row.map_err(|e| MigrationError::Ledger(format!("failed to read entry: {e}")))?;
            let applied_at = parse_datetime(&applied_at).ok_or_else(|| {
                MigrationError::Ledger(format!(
                    "unreadable applied_at '{applied_at}' for version {version}"
                ))
            })?;
            entries.push(LedgerEntry {
                id,
                version,
                name,
                description,
                applied_at,
                execution_time,
            });
        }
        Ok(entries)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Rows written by hand through datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_db() -> (Connection, MigrationLedger) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = MigrationLedger::new();
        ledger.ensure_table(&conn).unwrap();
        (conn, ledger)
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = MigrationLedger::new();
        assert!(ledger.ensure_table(&conn).unwrap());
        assert!(!ledger.ensure_table(&conn).unwrap());
        assert!(schema::table_exists(&conn, LEDGER_TABLE).unwrap());
    }

    #[test]
    fn ensure_table_keeps_existing_rows() {
        let (conn, ledger) = ledger_db();
        ledger
            .record(&conn, "20241201_000001", "initial_tables", None, Some(0.5))
            .unwrap();
        ledger.ensure_table(&conn).unwrap();
        assert_eq!(ledger.entries(&conn).unwrap().len(), 1);
    }

    #[test]
    fn records_and_reads_back_versions() {
        let (conn, ledger) = ledger_db();
        assert!(ledger.applied_versions(&conn).unwrap().is_empty());

        ledger
            .record(
                &conn,
                "20241201_000002",
                "add_user_columns",
                Some("Add phone and language_code"),
                Some(0.25),
            )
            .unwrap();
        ledger
            .record(&conn, "20241201_000001", "initial_tables", None, None)
            .unwrap();

        let versions = ledger.applied_versions(&conn).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains("20241201_000001"));
        assert!(versions.contains("20241201_000002"));

        let entries = ledger.entries(&conn).unwrap();
        assert_eq!(entries[0].version, "20241201_000001");
        assert_eq!(entries[0].description, None);
        assert_eq!(entries[0].execution_time, None);
        assert_eq!(entries[1].name, "add_user_columns");
        assert_eq!(
            entries[1].description.as_deref(),
            Some("Add phone and language_code")
        );
        assert_eq!(entries[1].execution_time, Some(0.25));
    }

    #[test]
    fn duplicate_record_is_rejected() {
        let (conn, ledger) = ledger_db();
        ledger
            .record(&conn, "20241201_000001", "initial_tables", None, None)
            .unwrap();

        let err = ledger
            .record(&conn, "20241201_000001", "initial_tables", None, None)
            .unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(_)));
        assert!(err.to_string().contains("already recorded"));
        assert_eq!(ledger.entries(&conn).unwrap().len(), 1);
    }

    #[test]
    fn applied_at_is_stamped_by_the_database() {
        let (conn, ledger) = ledger_db();
        let before = Utc::now() - chrono::Duration::seconds(5);
        ledger
            .record(&conn, "20241201_000001", "initial_tables", None, None)
            .unwrap();

        let entry = &ledger.entries(&conn).unwrap()[0];
        assert!(entry.applied_at >= before);
        assert!(entry.applied_at <= Utc::now() + chrono::Duration::seconds(5));
    }

    #[test]
    fn history_lists_newest_first() {
        let (conn, ledger) = ledger_db();
        conn.execute(
            "INSERT INTO migration_history (version, name, applied_at)
             VALUES ('20241201_000001', 'initial_tables', '2024-12-01 10:00:00')",
            [],
        )
        .unwrap();
        ledger
            .record(&conn, "20241201_000002", "add_user_columns", None, None)
            .unwrap();

        let history = ledger.history(&conn).unwrap();
        assert_eq!(history[0].version, "20241201_000002");
        assert_eq!(history[1].version, "20241201_000001");
        assert_eq!(
            history[1].applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-12-01 10:00:00"
        );
    }

    #[test]
    fn unreadable_applied_at_is_an_error() {
        let (conn, ledger) = ledger_db();
        conn.execute(
            "INSERT INTO migration_history (version, name, applied_at)
             VALUES ('20241201_000001', 'initial_tables', 'yesterday')",
            [],
        )
        .unwrap();

        let err = ledger.history(&conn).unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(_)));
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn other_constraint_failures_are_not_reported_as_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE migration_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version VARCHAR(20) NOT NULL UNIQUE,
                name VARCHAR(255) NOT NULL CHECK (length(name) > 0),
                description TEXT,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                execution_time REAL
            );",
        )
        .unwrap();
        let ledger = MigrationLedger::new();
        assert!(!ledger.ensure_table(&conn).unwrap());

        let err = ledger
            .record(&conn, "20241201_000001", "", None, None)
            .unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(_)));
        assert!(!err.to_string().contains("already recorded"));
        assert!(err.to_string().contains("CHECK"));
    }

    #[test]
    fn reading_without_table_is_a_ledger_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = MigrationLedger::new().applied_versions(&conn).unwrap_err();
        assert!(matches!(err, MigrationError::Ledger(_)));
    }
}

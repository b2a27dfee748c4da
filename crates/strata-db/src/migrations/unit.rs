use rusqlite::Connection;
use tracing::warn;

use super::MigrationError;

/// One hand-authored, versioned schema change.
///
/// Units receive the connection of the run's outer transaction, so anything
/// they execute is committed or rolled back together with the rest of the
/// batch. A unit's version must never change once released.
pub trait MigrationUnit: Send + Sync {
    /// `YYYYMMDD_HHMMSS`, unique across all registered units.
    fn version(&self) -> &str;

    /// Short snake_case identifier, snapshotted into the ledger.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Decide whether this environment needs the change.
    ///
    /// Returning `false` leaves the unit unrecorded, so it is evaluated again
    /// on the next run. Must not modify the schema.
    fn precheck(&self, _conn: &Connection) -> rusqlite::Result<bool> {
        Ok(true)
    }

    /// Apply the change. Must be safe against a freshly created database.
    fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()>;

    fn downgrade(&self, _conn: &Connection) -> rusqlite::Result<()> {
        let notice = MigrationError::DowngradeUnavailable {
            version: self.version().to_string(),
            name: self.name().to_string(),
        };
        warn!("{notice}");
        Ok(())
    }

    /// `{version}_{name}`, as used in log lines and file names.
    fn label(&self) -> String {
        format!("{}_{}", self.version(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CreateNotes;

    impl MigrationUnit for CreateNotes {
        fn version(&self) -> &str {
            "20241201_000001"
        }

        fn name(&self) -> &str {
            "create_notes"
        }

        fn description(&self) -> &str {
            "Create notes table"
        }

        fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
        }
    }

    #[test]
    fn precheck_defaults_to_true() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(CreateNotes.precheck(&conn).unwrap());
    }

    #[test]
    fn default_downgrade_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        CreateNotes.upgrade(&conn).unwrap();
        CreateNotes.downgrade(&conn).unwrap();

        let still_there: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name='notes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(still_there);
    }

    #[test]
    fn label_joins_version_and_name() {
        assert_eq!(CreateNotes.label(), "20241201_000001_create_notes");
    }
}

use rusqlite::Connection;
use tracing::info;

use crate::migrations::{MigrationUnit, schema};

/// Invite-only access: an admin flag on users and single-use invitation tokens.
pub struct AddInvitationsMigration;

impl MigrationUnit for AddInvitationsMigration {
    fn version(&self) -> &str {
        "20241201_000003"
    }

    fn name(&self) -> &str {
        "add_invitations"
    }

    fn description(&self) -> &str {
        "Add users.is_admin and the invitations table"
    }

    fn precheck(&self, conn: &Connection) -> rusqlite::Result<bool> {
        let has_is_admin = schema::column_exists(conn, "users", "is_admin")?;
        let has_invitations = schema::table_exists(conn, "invitations")?;
        Ok(!(has_is_admin && has_invitations))
    }

    fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        if !schema::column_exists(conn, "users", "is_admin")? {
            info!("adding is_admin column to users");
            conn.execute_batch("ALTER TABLE users ADD COLUMN is_admin BOOLEAN DEFAULT FALSE;")?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS invitations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token VARCHAR(255) UNIQUE NOT NULL,
                created_by BIGINT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                is_used BOOLEAN DEFAULT FALSE,
                used_by BIGINT,
                used_at TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_invitations_is_used ON invitations(is_used);",
        )?;

        info!("users.is_admin ensured, invitations ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::versions::InitialTablesMigration;

    #[test]
    fn creates_admin_flag_and_invitations() {
        let conn = Connection::open_in_memory().unwrap();
        InitialTablesMigration.upgrade(&conn).unwrap();
        assert!(AddInvitationsMigration.precheck(&conn).unwrap());

        AddInvitationsMigration.upgrade(&conn).unwrap();

        assert!(schema::column_exists(&conn, "users", "is_admin").unwrap());
        assert!(schema::table_exists(&conn, "invitations").unwrap());
        assert!(schema::index_exists(&conn, "idx_invitations_is_used").unwrap());
        assert!(!AddInvitationsMigration.precheck(&conn).unwrap());
    }

    #[test]
    fn invitation_tokens_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        InitialTablesMigration.upgrade(&conn).unwrap();
        AddInvitationsMigration.upgrade(&conn).unwrap();

        conn.execute(
            "INSERT INTO invitations (token, created_by) VALUES ('abc', 1)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO invitations (token, created_by) VALUES ('abc', 2)",
            [],
        );
        assert!(dup.is_err());
    }
}

use rusqlite::Connection;
use tracing::info;

use crate::migrations::{MigrationUnit, schema};

pub struct AddUserColumnsMigration;

impl MigrationUnit for AddUserColumnsMigration {
    fn version(&self) -> &str {
        "20241201_000002"
    }

    fn name(&self) -> &str {
        "add_user_columns"
    }

    fn description(&self) -> &str {
        "Add phone and language_code columns to users table"
    }

    fn precheck(&self, conn: &Connection) -> rusqlite::Result<bool> {
        let phone = schema::column_exists(conn, "users", "phone")?;
        let language_code = schema::column_exists(conn, "users", "language_code")?;
        Ok(!(phone && language_code))
    }

    fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        if !schema::column_exists(conn, "users", "phone")? {
            conn.execute_batch("ALTER TABLE users ADD COLUMN phone VARCHAR(20);")?;
        }
        if !schema::column_exists(conn, "users", "language_code")? {
            conn.execute_batch(
                "ALTER TABLE users ADD COLUMN language_code VARCHAR(10) DEFAULT 'ru';",
            )?;
        }
        conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_users_phone ON users(phone);")?;

        info!("added phone and language_code columns to users");
        Ok(())
    }

    fn downgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch("DROP INDEX IF EXISTS idx_users_phone;")?;
        if schema::column_exists(conn, "users", "phone")? {
            conn.execute_batch("ALTER TABLE users DROP COLUMN phone;")?;
        }
        if schema::column_exists(conn, "users", "language_code")? {
            conn.execute_batch("ALTER TABLE users DROP COLUMN language_code;")?;
        }
        info!("removed phone and language_code columns from users");
        Ok(())
    }
}

use rusqlite::Connection;
use tracing::info;

use crate::migrations::{MigrationUnit, schema};

/// Bring `users` to the expected shape (whether it predates the ledger or
/// not) and create `bot_stats`.
pub struct InitialTablesMigration;

impl MigrationUnit for InitialTablesMigration {
    fn version(&self) -> &str {
        "20241201_000001"
    }

    fn name(&self) -> &str {
        "initial_tables"
    }

    fn description(&self) -> &str {
        "Adapt existing tables and create bot_stats table"
    }

    fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        if schema::table_exists(conn, "users")? {
            info!("table 'users' already exists, checking structure");
            if !schema::column_exists(conn, "users", "is_active")? {
                info!("adding is_active column to users");
                conn.execute_batch("ALTER TABLE users ADD COLUMN is_active BOOLEAN DEFAULT TRUE;")?;
            }
        } else {
            info!("creating users table");
            conn.execute_batch(
                "CREATE TABLE users (
                    id BIGINT PRIMARY KEY,
                    username VARCHAR(255),
                    first_name VARCHAR(255),
                    last_name VARCHAR(255),
                    is_active BOOLEAN DEFAULT TRUE,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );",
            )?;
        }

        // A legacy users table may lack the timestamp columns; only index
        // what is there.
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
             CREATE INDEX IF NOT EXISTS idx_users_is_active ON users(is_active);",
        )?;
        if schema::column_exists(conn, "users", "created_at")? {
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at);",
            )?;
        }
        if schema::column_exists(conn, "users", "updated_at")? {
            conn.execute_batch(
                "DROP TRIGGER IF EXISTS update_users_updated_at;
                 CREATE TRIGGER update_users_updated_at
                 AFTER UPDATE ON users
                 FOR EACH ROW WHEN NEW.updated_at IS OLD.updated_at
                 BEGIN
                     UPDATE users SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
                 END;",
            )?;
        }

        if !schema::table_exists(conn, "bot_stats")? {
            info!("creating bot_stats table");
            conn.execute_batch(
                "CREATE TABLE bot_stats (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    total_users INTEGER DEFAULT 0,
                    active_users INTEGER DEFAULT 0,
                    last_restart TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    status VARCHAR(50) DEFAULT 'active',
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );
                CREATE INDEX IF NOT EXISTS idx_bot_stats_status ON bot_stats(status);
                CREATE INDEX IF NOT EXISTS idx_bot_stats_created_at ON bot_stats(created_at);",
            )?;
        }

        Ok(())
    }

    fn downgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        // users holds live data, only bot_stats is dropped
        conn.execute_batch("DROP TABLE IF EXISTS bot_stats;")?;
        info!("dropped bot_stats table");
        Ok(())
    }
}

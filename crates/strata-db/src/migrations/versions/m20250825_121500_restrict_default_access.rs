use rusqlite::Connection;
use tracing::info;

use crate::migrations::{MigrationUnit, schema};

/// New users start without access until they redeem an invitation.
pub struct RestrictDefaultAccessMigration;

impl MigrationUnit for RestrictDefaultAccessMigration {
    fn version(&self) -> &str {
        "20250825_121500"
    }

    fn name(&self) -> &str {
        "restrict_default_access"
    }

    fn description(&self) -> &str {
        "Set users.is_active default to FALSE"
    }

    fn precheck(&self, conn: &Connection) -> rusqlite::Result<bool> {
        let default = schema::column_default(conn, "users", "is_active")?;
        Ok(!default.as_deref().is_some_and(is_false_literal))
    }

    fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        info!("setting users.is_active default to FALSE");
        schema::set_column_default(conn, "users", "is_active", "FALSE")
    }

    fn downgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
        schema::set_column_default(conn, "users", "is_active", "TRUE")
    }
}

fn is_false_literal(expr: &str) -> bool {
    let expr = expr.trim().trim_start_matches('(').trim_end_matches(')').trim();
    expr.eq_ignore_ascii_case("false") || expr == "0"
}

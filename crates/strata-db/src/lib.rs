pub mod database;
pub mod migrations;
pub mod scaffold;

pub use database::Database;
pub use migrations::{
    LedgerEntry, MigrationError, MigrationLedger, MigrationRunner, MigrationSource,
    MigrationStatus, MigrationUnit, RunReport, UnitOutcome,
};
pub use scaffold::{ScaffoldedMigration, create_migration};

/// Migration system for tracking and applying database schema changes.
///
/// Each migration unit has a `YYYYMMDD_HHMMSS` version and imperative
/// upgrade logic. Pending units are applied in version order inside a single
/// transaction and tracked in the `migration_history` table.
pub mod error;
pub mod ledger;
pub mod runner;
pub mod schema;
pub mod source;
pub mod unit;
pub mod versions;

pub use error::MigrationError;
pub use ledger::{LEDGER_TABLE, LedgerEntry, MigrationLedger};
pub use runner::{MigrationRunner, MigrationStatus, PendingUnit, RunReport, UnitOutcome};
pub use source::{MigrationSource, MigrationSourceBuilder};
pub use unit::MigrationUnit;

use thiserror::Error;

/// Failures raised by the migration engine.
///
/// Only `Discovery` and `DowngradeUnavailable` are informational: the engine
/// logs them and carries on. Everything else aborts the run and rolls back
/// the batch.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration '{label}' could not be loaded: {reason}")]
    Discovery { label: String, reason: String },

    #[error("duplicate migration version {version}: registered by both '{first}' and '{second}'")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    #[error("failed to bootstrap migration ledger: {0}")]
    LedgerBootstrap(String),

    #[error("migration ledger error: {0}")]
    Ledger(String),

    #[error("precheck for migration {version} ({name}) failed: {reason}")]
    Precheck {
        version: String,
        name: String,
        reason: String,
    },

    #[error("migration {version} ({name}) failed: {reason}")]
    Upgrade {
        version: String,
        name: String,
        reason: String,
    },

    #[error("no downgrade available for migration {version} ({name})")]
    DowngradeUnavailable { version: String, name: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl MigrationError {
    /// Whether the error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MigrationError::Discovery { .. } | MigrationError::DowngradeUnavailable { .. }
        )
    }
}

impl From<MigrationError> for strata_common::Error {
    fn from(err: MigrationError) -> Self {
        strata_common::Error::Migration(err.to_string())
    }
}

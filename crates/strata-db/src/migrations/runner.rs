use std::collections::HashSet;
use std::time::Instant;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{error, info, warn};

use super::{
    LEDGER_TABLE, LedgerEntry, MigrationError, MigrationLedger, MigrationSource, MigrationUnit,
    schema,
};

/// What happened to one pending unit during a run.
#[derive(Debug)]
pub enum UnitOutcome {
    Applied {
        version: String,
        name: String,
        elapsed_secs: f64,
    },
    /// The precheck declined; the unit stays pending.
    Skipped { version: String, name: String },
    Failed(MigrationError),
}

/// Outcomes of a successful run, in application order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl RunReport {
    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Applied { version, .. } => Some(version.as_str()),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Skipped { version, .. } => Some(version.as_str()),
            _ => None,
        })
    }

    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }

    pub fn is_noop(&self) -> bool {
        self.applied_count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingUnit {
    pub version: String,
    pub name: String,
    pub description: String,
}

/// Read-only view of which units are recorded and which are still pending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<PendingUnit>,
}

/// Applies pending migration units as one all-or-nothing batch.
pub struct MigrationRunner {
    source: MigrationSource,
    ledger: MigrationLedger,
}

impl MigrationRunner {
    pub fn new(source: MigrationSource) -> Self {
        Self::with_ledger(source, MigrationLedger::new())
    }

    pub fn with_ledger(source: MigrationSource, ledger: MigrationLedger) -> Self {
        Self { source, ledger }
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Apply every pending unit in version order inside one transaction.
    ///
    /// The transaction takes SQLite's write lock up front, so a second
    /// process migrating the same file waits for the busy timeout instead of
    /// interleaving. Any failure drops the transaction, which rolls back the
    /// ledger bootstrap and every unit applied earlier in the run.
    pub fn run(&self, conn: &mut Connection) -> Result<RunReport, MigrationError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        self.ledger.ensure_table(&tx)?;
        let applied = self.ledger.applied_versions(&tx)?;
        let pending = self.pending(&applied)?;

        if pending.is_empty() {
            info!(
                "database schema is up to date ({} migration(s) applied)",
                applied.len()
            );
            tx.commit()?;
            return Ok(RunReport::default());
        }

        info!("found {} pending migration(s)", pending.len());

        let mut report = RunReport::default();
        for unit in pending {
            match self.apply_unit(&tx, unit) {
                UnitOutcome::Failed(err) => {
                    error!("migration run aborted, rolling back: {err}");
                    return Err(err);
                }
                outcome => report.outcomes.push(outcome),
            }
        }

        tx.commit()?;
        info!(
            "migration run complete: {} applied, {} skipped",
            report.applied_count(),
            report.skipped_count()
        );
        Ok(report)
    }

    /// Compare the ledger with the registered units without writing anything.
    pub fn status(&self, conn: &Connection) -> Result<MigrationStatus, MigrationError> {
        let units = self.source.discover()?;

        let has_ledger = schema::table_exists(conn, LEDGER_TABLE).map_err(|e| {
            MigrationError::LedgerBootstrap(format!("failed to inspect schema: {e}"))
        })?;
        let applied = if has_ledger {
            self.ledger.entries(conn)?
        } else {
            Vec::new()
        };

        let recorded: HashSet<&str> = applied.iter().map(|e| e.version.as_str()).collect();
        let pending = units
            .into_iter()
            .filter(|u| !recorded.contains(u.version()))
            .map(|u| PendingUnit {
                version: u.version().to_string(),
                name: u.name().to_string(),
                description: u.description().to_string(),
            })
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    fn pending(&self, applied: &HashSet<String>) -> Result<Vec<&dyn MigrationUnit>, MigrationError> {
        Ok(self
            .source
            .discover()?
            .into_iter()
            .filter(|u| !applied.contains(u.version()))
            .collect())
    }

    fn apply_unit(&self, conn: &Connection, unit: &dyn MigrationUnit) -> UnitOutcome {
        let version = unit.version().to_string();
        let name = unit.name().to_string();

        match unit.precheck(conn) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "migration {} not needed in this environment, leaving it pending",
                    unit.label()
                );
                return UnitOutcome::Skipped { version, name };
            }
            Err(e) => {
                return UnitOutcome::Failed(MigrationError::Precheck {
                    version,
                    name,
                    reason: e.to_string(),
                });
            }
        }

        info!("applying migration {}: {}", unit.label(), unit.description());
        let start = Instant::now();
        if let Err(e) = unit.upgrade(conn) {
            return UnitOutcome::Failed(MigrationError::Upgrade {
                version,
                name,
                reason: e.to_string(),
            });
        }
        let elapsed_secs = start.elapsed().as_secs_f64();

        if let Err(e) = self.ledger.record(
            conn,
            &version,
            &name,
            Some(unit.description()),
            Some(elapsed_secs),
        ) {
            return UnitOutcome::Failed(e);
        }

        info!("applied migration {} in {elapsed_secs:.2}s", unit.label());
        UnitOutcome::Applied {
            version,
            name,
            elapsed_secs,
        }
    }
}

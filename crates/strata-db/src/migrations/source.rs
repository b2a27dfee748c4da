use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, warn};

use super::{MigrationError, MigrationUnit};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}_\d{6}$").expect("valid version regex"));

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid name regex"));

const VERSION_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_LEN: usize = 255;

/// The statically registered set of migration units known to the program.
pub struct MigrationSource {
    units: Vec<Box<dyn MigrationUnit>>,
}

/// Collects units at program start, in any order.
#[derive(Default)]
pub struct MigrationSourceBuilder {
    units: Vec<Box<dyn MigrationUnit>>,
}

impl MigrationSourceBuilder {
    pub fn register(self, unit: impl MigrationUnit + 'static) -> Self {
        self.register_boxed(Box::new(unit))
    }

    pub fn register_boxed(mut self, unit: Box<dyn MigrationUnit>) -> Self {
        self.units.push(unit);
        self
    }

    pub fn build(self) -> MigrationSource {
        MigrationSource { units: self.units }
    }
}

impl MigrationSource {
    pub fn builder() -> MigrationSourceBuilder {
        MigrationSourceBuilder::default()
    }

    /// Number of registered units, valid or not.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every well-formed unit, sorted ascending by version.
    ///
    /// Malformed units are logged and left out. Any two registrations sharing
    /// a version fail the whole discovery, even when their metadata matches.
    pub fn discover(&self) -> Result<Vec<&dyn MigrationUnit>, MigrationError> {
        let mut units: Vec<&dyn MigrationUnit> = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            match validate(unit.as_ref()) {
                Ok(()) => units.push(unit.as_ref()),
                Err(e) => warn!("excluding migration: {e}"),
            }
        }

        units.sort_by(|a, b| a.version().cmp(b.version()));

        let mut discovered: Vec<&dyn MigrationUnit> = Vec::with_capacity(units.len());
        for unit in units {
            if let Some(prev) = discovered.last()
                && prev.version() == unit.version()
            {
                return Err(MigrationError::DuplicateVersion {
                    version: unit.version().to_string(),
                    first: prev.name().to_string(),
                    second: unit.name().to_string(),
                });
            }
            discovered.push(unit);
        }

        debug!("discovered {} migration(s)", discovered.len());
        Ok(discovered)
    }
}

fn validate(unit: &dyn MigrationUnit) -> Result<(), MigrationError> {
    let malformed = |reason: String| MigrationError::Discovery {
        label: unit.label(),
        reason,
    };

    let version = unit.version();
    if !VERSION_RE.is_match(version) {
        return Err(malformed(format!(
            "version '{version}' is not in YYYYMMDD_HHMMSS form"
        )));
    }
    NaiveDateTime::parse_from_str(version, VERSION_FORMAT)
        .map_err(|e| malformed(format!("version '{version}' is not a valid timestamp: {e}")))?;

    let name = unit.name();
    if !NAME_RE.is_match(name) {
        return Err(malformed(format!(
            "name '{name}' must be snake_case starting with a letter"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(malformed(format!(
            "name is longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    struct Unit {
        version: &'static str,
        name: &'static str,
        description: &'static str,
    }

    impl Unit {
        fn new(version: &'static str, name: &'static str) -> Self {
            Self {
                version,
                name,
                description: "test unit",
            }
        }
    }

    impl MigrationUnit for Unit {
        fn version(&self) -> &str {
            self.version
        }

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn upgrade(&self, _conn: &Connection) -> rusqlite::Result<()> {
            Ok(())
        }
    }

    fn versions(units: &[&dyn MigrationUnit]) -> Vec<String> {
        units.iter().map(|u| u.version().to_string()).collect()
    }

    #[test]
    fn sorts_by_version_regardless_of_registration_order() {
        let source = MigrationSource::builder()
            .register(Unit::new("20250825_121500", "restrict_default_access"))
            .register(Unit::new("20241201_000002", "add_user_columns"))
            .register(Unit::new("20241201_000001", "initial_tables"))
            .build();

        let units = source.discover().unwrap();
        assert_eq!(
            versions(&units),
            vec!["20241201_000001", "20241201_000002", "20250825_121500"]
        );
    }

    #[test]
    fn excludes_malformed_units() {
        let source = MigrationSource::builder()
            .register(Unit::new("20241201_000001", "initial_tables"))
            .register(Unit::new("2024-12-01", "dashed_version"))
            .register(Unit::new("20241301_000000", "month_thirteen"))
            .register(Unit::new("20241201_000003", "Bad Name"))
            .register(Unit::new("20241201_000004", ""))
            .build();

        assert_eq!(source.len(), 5);
        let units = source.discover().unwrap();
        assert_eq!(versions(&units), vec!["20241201_000001"]);
    }

    #[test]
    fn rejects_distinct_units_sharing_a_version() {
        let source = MigrationSource::builder()
            .register(Unit::new("20250825_121500", "add_invitations"))
            .register(Unit::new("20241201_000001", "initial_tables"))
            .register(Unit::new("20250825_121500", "add_logging_tables"))
            .build();

        match source.discover() {
            Err(MigrationError::DuplicateVersion {
                version,
                first,
                second,
            }) => {
                assert_eq!(version, "20250825_121500");
                assert_eq!(first, "add_invitations");
                assert_eq!(second, "add_logging_tables");
            }
            other => panic!("expected DuplicateVersion, got {:?}", other.map(|u| versions(&u))),
        }
    }

    #[test]
    fn same_name_with_different_description_is_still_a_duplicate() {
        let source = MigrationSource::builder()
            .register(Unit::new("20241201_000003", "add_invitations"))
            .register(Unit {
                version: "20241201_000003",
                name: "add_invitations",
                description: "a different body",
            })
            .build();

        assert!(matches!(
            source.discover(),
            Err(MigrationError::DuplicateVersion { .. })
        ));
    }

    #[test]
    fn repeated_registration_is_a_duplicate() {
        let source = MigrationSource::builder()
            .register(Unit::new("20241201_000001", "initial_tables"))
            .register(Unit::new("20241201_000001", "initial_tables"))
            .build();

        assert!(matches!(
            source.discover(),
            Err(MigrationError::DuplicateVersion { .. })
        ));
    }

    struct CreateInvites;
    struct CreateLogs;

    impl MigrationUnit for CreateInvites {
        fn version(&self) -> &str {
            "20240101_000000"
        }

        fn name(&self) -> &str {
            "add_stuff"
        }

        fn description(&self) -> &str {
            "Add stuff"
        }

        fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE invites (id INTEGER PRIMARY KEY)")
        }
    }

    impl MigrationUnit for CreateLogs {
        fn version(&self) -> &str {
            "20240101_000000"
        }

        fn name(&self) -> &str {
            "add_stuff"
        }

        fn description(&self) -> &str {
            "Add stuff"
        }

        fn upgrade(&self, conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE logs (id INTEGER PRIMARY KEY)")
        }
    }

    #[test]
    fn different_bodies_with_matching_metadata_are_rejected() {
        let source = MigrationSource::builder()
            .register(CreateInvites)
            .register(CreateLogs)
            .build();

        match source.discover() {
            Err(MigrationError::DuplicateVersion { version, .. }) => {
                assert_eq!(version, "20240101_000000");
            }
            other => panic!("expected DuplicateVersion, got {:?}", other.map(|u| versions(&u))),
        }
    }

    #[test]
    fn empty_source_discovers_nothing() {
        let source = MigrationSource::builder().build();
        assert!(source.is_empty());
        assert!(source.discover().unwrap().is_empty());
    }
}

//! Generates skeleton migration units for new schema changes.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use strata_common::{Error, Result};
use tracing::info;

static SCAFFOLD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid scaffold name regex"));

/// A freshly written migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldedMigration {
    pub path: PathBuf,
    pub version: String,
    pub name: String,
    pub struct_name: String,
}

/// Write `m{version}_{name}.rs` into `dir` with a unit stub to fill in.
///
/// The version is taken from `now`. Existing files are never overwritten.
/// The new unit still has to be added to the registry by hand.
pub fn create_migration(
    dir: &Path,
    name: &str,
    description: Option<&str>,
    now: NaiveDateTime,
) -> Result<ScaffoldedMigration> {
    if !SCAFFOLD_NAME_RE.is_match(name) {
        return Err(Error::Migration(format!(
            "invalid migration name '{name}': use letters, digits and underscores, starting with a letter"
        )));
    }

    let name = name.to_ascii_lowercase();
    let version = now.format("%Y%m%d_%H%M%S").to_string();
    let struct_name = format!("{}Migration", camel_case(&name));
    let description = match description {
        Some(d) if !d.trim().is_empty() => d.trim().to_string(),
        _ => format!("Migration: {}", name.replace('_', " ")),
    };

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("m{version}_{name}.rs"));

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(Error::Migration(format!(
                "migration file already exists: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(render(&version, &name, &description, &struct_name).as_bytes())?;

    info!("created migration {} at {}", struct_name, path.display());

    Ok(ScaffoldedMigration {
        path,
        version,
        name,
        struct_name,
    })
}

fn camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn render(version: &str, name: &str, description: &str, struct_name: &str) -> String {
    format!(
        r#"use rusqlite::Connection;
use tracing::info;

use crate::migrations::MigrationUnit;

pub struct {struct_name};

impl MigrationUnit for {struct_name} {{
    fn version(&self) -> &str {{
        "{version}"
    }}

    fn name(&self) -> &str {{
        "{name}"
    }}

    fn description(&self) -> &str {{
        {description:?}
    }}

    fn precheck(&self, _conn: &Connection) -> rusqlite::Result<bool> {{
        // Return false once the change is already present (see migrations::schema).
        Ok(true)
    }}

    fn upgrade(&self, _conn: &Connection) -> rusqlite::Result<()> {{
        info!("applied migration {name}");
        Ok(())
    }}

    fn downgrade(&self, _conn: &Connection) -> rusqlite::Result<()> {{
        info!("reverted migration {name}");
        Ok(())
    }}
}}
"#
    )
}

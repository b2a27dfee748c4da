use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Loads `AppConfig` from a YAML or TOML file, then layers environment
/// overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.strata/config.yml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".strata")
            .join("config.yml")
    }

    /// Load the config at `path` (or the default path) and apply process
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let config = Self::load_file(&path)?;
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    pub fn load_file(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Apply `STRATA_*` (and the legacy `LOG_LEVEL`) overrides read through `lookup`.
    pub fn apply_overrides<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STRATA_DATABASE_PATH") {
            config.database.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("STRATA_BUSY_TIMEOUT_MS") {
            config.database.busy_timeout_ms = raw.trim().parse().map_err(|e| {
                Error::Config(format!("invalid STRATA_BUSY_TIMEOUT_MS '{raw}': {e}"))
            })?;
        }
        if let Some(dir) = lookup("STRATA_MIGRATIONS_DIR") {
            config.migrations.dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("STRATA_LOG_LEVEL").or_else(|| lookup("LOG_LEVEL")) {
            config.log.level = level.to_lowercase();
        }
        if let Some(raw) = lookup("STRATA_LOG_JSON") {
            config.log.json = parse_bool(&raw).ok_or_else(|| {
                Error::Config(format!("invalid STRATA_LOG_JSON '{raw}': expected a boolean"))
            })?;
        }
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

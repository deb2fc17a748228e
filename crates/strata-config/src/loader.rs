use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CANDIDATE_FILES: [&str; 3] = ["strata.yml", "strata.yaml", "strata.toml"];

pub const ENV_DATABASE: &str = "STRATA_DATABASE";
pub const ENV_MIGRATIONS_DIR: &str = "STRATA_MIGRATIONS_DIR";
pub const ENV_LEDGER_TABLE: &str = "STRATA_LEDGER_TABLE";
pub const ENV_LOCK_TABLE: &str = "STRATA_LOCK_TABLE";

/// Locates and parses the strata config file, then layers environment
/// overrides on top.
pub struct ConfigLoader {
    path: Option<PathBuf>,
    search_dir: PathBuf,
}

impl ConfigLoader {
    /// Search `dir` for `strata.yml`, `strata.yaml` or `strata.toml`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: None,
            search_dir: dir.into(),
        }
    }

    /// Load exactly this file; it must exist.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let search_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self {
            path: Some(path),
            search_dir,
        }
    }

    pub fn load(&self) -> Result<AppConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Like [`ConfigLoader::load`] but reads overrides through `lookup`
    /// instead of the process environment.
    pub fn load_with_env<F>(&self, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.resolve_path()? {
            Some(path) => {
                let config = parse_file(&path)?;
                info!("loaded config from {}", path.display());
                config
            }
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.search_dir.display()
                );
                AppConfig::default()
            }
        };

        apply_env_overrides(&mut config, lookup);
        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.path {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }

        Ok(CANDIDATE_FILES
            .iter()
            .map(|name| self.search_dir.join(name))
            .find(|candidate| candidate.is_file()))
    }
}

fn parse_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DATABASE) {
        config.database.path = PathBuf::from(path);
    }
    if let Some(dir) = lookup(ENV_MIGRATIONS_DIR) {
        config.migrations.directory = PathBuf::from(dir);
    }
    if let Some(table) = lookup(ENV_LEDGER_TABLE) {
        config.migrations.ledger_table = table;
    }
    if let Some(table) = lookup(ENV_LOCK_TABLE) {
        config.migrations.lock_table = table;
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_common::{DEFAULT_LEDGER_TABLE, DEFAULT_LOCK_TABLE, Result, validate_table_names};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// How long SQLite waits on a competing writer before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    pub ledger_table: String,
    pub lock_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
        }
    }
}

impl AppConfig {
    /// Reject configurations that would produce unusable SQL.
    pub fn validate(&self) -> Result<()> {
        validate_table_names(&self.migrations.ledger_table, &self.migrations.lock_table)
    }
}

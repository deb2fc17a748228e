use rusqlite::Connection;
use strata_common::{
    DEFAULT_LEDGER_TABLE, DEFAULT_LOCK_TABLE, Error, Result, quote_identifier, validate_table_names,
};
use tracing::debug;

/// Names of the two bookkeeping tables. Validated on construction and
/// always double-quoted in SQL, so keywords work as names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    ledger: String,
    lock: String,
}

impl TableNames {
    pub fn new(ledger: impl Into<String>, lock: impl Into<String>) -> Result<Self> {
        let (ledger, lock) = (ledger.into(), lock.into());
        validate_table_names(&ledger, &lock)?;
        Ok(Self { ledger, lock })
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }

    pub fn lock(&self) -> &str {
        &self.lock
    }

    /// The ledger table as it appears in SQL text.
    pub fn ledger_sql(&self) -> String {
        quote_identifier(&self.ledger)
    }

    pub fn lock_sql(&self) -> String {
        quote_identifier(&self.lock)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            ledger: DEFAULT_LEDGER_TABLE.to_string(),
            lock: DEFAULT_LOCK_TABLE.to_string(),
        }
    }
}

/// Create the ledger and lock tables and seed the single lock row.
/// Every statement is create-if-absent, so concurrent or repeated calls
/// are harmless.
pub fn ensure_schema(conn: &Connection, tables: &TableNames) -> Result<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {ledger} (
            name TEXT PRIMARY KEY,
            executed_at TEXT NOT NULL,
            batch INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {lock} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            locked INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO {lock} (id, locked) VALUES (1, 0);",
        ledger = tables.ledger_sql(),
        lock = tables.lock_sql(),
    );

    conn.execute_batch(&sql)
        .map_err(|e| Error::Migration(format!("failed to initialise migration tables: {e}")))?;

    debug!(
        "migration tables ready ({}, {})",
        tables.ledger(),
        tables.lock()
    );
    Ok(())
}

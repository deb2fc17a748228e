use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{field} must be a plain SQL identifier, got {value:?}"
        )))
    }
}

/// The ledger and lock table pair: both plain identifiers, and distinct even
/// under SQLite's case-insensitive name matching.
pub fn validate_table_names(ledger: &str, lock: &str) -> Result<()> {
    validate_identifier("ledger_table", ledger)?;
    validate_identifier("lock_table", lock)?;
    if ledger.eq_ignore_ascii_case(lock) {
        return Err(Error::Config(format!(
            "ledger_table and lock_table must be different tables, both are {ledger:?}"
        )));
    }
    Ok(())
}

/// Double-quote a validated identifier so keywords such as `order` are
/// usable as table names.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

pub mod error;
pub mod ident;

pub use error::{Direction, Error, FileError, Result};
pub use ident::{quote_identifier, validate_identifier, validate_table_names};

pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";
pub const DEFAULT_LOCK_TABLE: &str = "schema_migrations_lock";

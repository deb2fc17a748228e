use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("file error: {0}")]
    File(#[from] FileError),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("failed to {direction} migration {name}: {cause}")]
    Execution {
        name: String,
        direction: Direction,
        cause: String,
    },

    #[error("migration error: {0}")]
    Migration(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn is_lock(&self) -> bool {
        matches!(self, Error::Lock(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Error::File(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }
}

/// Problems discovering or validating migration units.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("migration source unavailable at {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("failed to load migration {name}: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("migration {name} is missing its {missing} operation")]
    Malformed { name: String, missing: &'static str },

    #[error("duplicate migration name {0}")]
    DuplicateName(String),

    #[error("applied migration {0} is no longer present in the catalog")]
    MissingUnit(String),
}

/// Which way a migration unit was being executed when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Rollback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Apply => f.write_str("apply"),
            Direction::Rollback => f.write_str("roll back"),
        }
    }
}

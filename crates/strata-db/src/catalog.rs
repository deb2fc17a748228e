//! Ordered, validated collection of migration units.
//!
//! Sources hand over loosely-shaped [`MigrationCandidate`]s; a [`Catalog`] is
//! only ever built from a complete, valid set of them, sorted by name.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use strata_common::{FileError, Result};

/// A forward or backward step. Runs inside the batch transaction.
pub type Operation = Arc<dyn Fn(&Connection) -> anyhow::Result<()> + Send + Sync>;

/// Anything that can produce migration candidates: a directory of SQL files,
/// closures registered in code, etc.
pub trait CatalogSource: Send + Sync {
    /// Human-readable origin, used in log lines.
    fn describe(&self) -> String;

    /// Read every candidate unit. Must not touch the database.
    fn candidates(&self) -> Result<Vec<MigrationCandidate>>;
}

/// A unit as discovered, before validation.
pub struct MigrationCandidate {
    pub name: String,
    pub forward: Option<Operation>,
    pub backward: Option<Operation>,
}

impl MigrationCandidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forward: None,
            backward: None,
        }
    }

    pub fn forward(mut self, op: Operation) -> Self {
        self.forward = Some(op);
        self
    }

    pub fn backward(mut self, op: Operation) -> Self {
        self.backward = Some(op);
        self
    }
}

impl fmt::Debug for MigrationCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationCandidate")
            .field("name", &self.name)
            .field("has_forward", &self.forward.is_some())
            .field("has_backward", &self.backward.is_some())
            .finish_non_exhaustive()
    }
}

/// A validated, reversible migration.
#[derive(Clone)]
pub struct MigrationUnit {
    name: String,
    forward: Operation,
    backward: Operation,
}

impl MigrationUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_forward(&self, conn: &Connection) -> anyhow::Result<()> {
        (self.forward)(conn)
    }

    pub fn run_backward(&self, conn: &Connection) -> anyhow::Result<()> {
        (self.backward)(conn)
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    units: Vec<MigrationUnit>,
}

impl Catalog {
    /// Validate every candidate and sort ascending by name. Any invalid
    /// candidate rejects the whole set.
    pub fn from_candidates(candidates: Vec<MigrationCandidate>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut units = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if candidate.name.trim().is_empty() {
                return Err(FileError::LoadFailed {
                    name: candidate.name,
                    reason: "migration name is empty".into(),
                }
                .into());
            }
            if !seen.insert(candidate.name.clone()) {
                return Err(FileError::DuplicateName(candidate.name).into());
            }

            let Some(forward) = candidate.forward else {
                return Err(FileError::Malformed {
                    name: candidate.name,
                    missing: "forward",
                }
                .into());
            };
            let Some(backward) = candidate.backward else {
                return Err(FileError::Malformed {
                    name: candidate.name,
                    missing: "backward",
                }
                .into());
            };

            units.push(MigrationUnit {
                name: candidate.name,
                forward,
                backward,
            });
        }

        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { units })
    }

    pub fn load(source: &dyn CatalogSource) -> Result<Self> {
        Self::from_candidates(source.candidates()?)
    }

    pub fn get(&self, name: &str) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by(|unit| unit.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

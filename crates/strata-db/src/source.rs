use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use strata_common::{FileError, Result};
use tracing::debug;

use crate::catalog::{CatalogSource, MigrationCandidate, Operation};

pub const UP_MARKER: &str = "-- migrate:up";
pub const DOWN_MARKER: &str = "-- migrate:down";

/// Migrations registered directly in Rust code.
#[derive(Default)]
pub struct CodeSource {
    units: Vec<(String, Operation, Operation)>,
}

impl CodeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn migration<U, D>(mut self, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
        D: Fn(&Connection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.units.push((name.into(), Arc::new(up), Arc::new(down)));
        self
    }

    /// Shorthand for a unit whose steps are plain SQL batches.
    pub fn sql(mut self, name: impl Into<String>, up: &str, down: &str) -> Self {
        self.units
            .push((name.into(), sql_operation(up), sql_operation(down)));
        self
    }
}

impl CatalogSource for CodeSource {
    fn describe(&self) -> String {
        format!("{} code-defined migrations", self.units.len())
    }

    fn candidates(&self) -> Result<Vec<MigrationCandidate>> {
        Ok(self
            .units
            .iter()
            .map(|(name, up, down)| {
                MigrationCandidate::new(name.clone())
                    .forward(Arc::clone(up))
                    .backward(Arc::clone(down))
            })
            .collect())
    }
}

/// A directory of `*.sql` files, one migration per file, named by file stem.
///
/// ```sql
/// -- migrate:up
/// CREATE TABLE users (id INTEGER PRIMARY KEY);
///
/// -- migrate:down
/// DROP TABLE users;
/// ```
pub struct SqlDirectorySource {
    dir: PathBuf,
}

impl SqlDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unavailable(&self, reason: impl ToString) -> FileError {
        FileError::SourceUnavailable {
            path: self.dir.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl CatalogSource for SqlDirectorySource {
    fn describe(&self) -> String {
        format!("sql directory {}", self.dir.display())
    }

    fn candidates(&self) -> Result<Vec<MigrationCandidate>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.unavailable(e))?;

        let mut candidates = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.unavailable(e))?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }

            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| FileError::LoadFailed {
                    name: path.display().to_string(),
                    reason: "file name is not valid UTF-8".into(),
                })?
                .to_string();

            let bytes = std::fs::read(&path).map_err(|e| FileError::LoadFailed {
                name: name.clone(),
                reason: format!("failed to read {}: {e}", path.display()),
            })?;
            let text = String::from_utf8(bytes).map_err(|_| FileError::LoadFailed {
                name: name.clone(),
                reason: "file is not valid UTF-8".into(),
            })?;

            let sections = parse_sections(&name, &text)?;
            debug!("discovered migration {name} at {}", path.display());

            let mut candidate = MigrationCandidate::new(name);
            if let Some(up) = sections.up {
                candidate = candidate.forward(sql_operation(&up));
            }
            if let Some(down) = sections.down {
                candidate = candidate.backward(sql_operation(&down));
            }
            candidates.push(candidate);
        }

        Ok(candidates)
    }
}

#[derive(Debug, Default, PartialEq)]
struct Sections {
    up: Option<String>,
    down: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split a migration file on its marker lines. A blank section counts as
/// absent; structural problems fail the load outright.
fn parse_sections(name: &str, text: &str) -> Result<Sections> {
    let mut section = Section::Preamble;
    let mut up: Option<String> = None;
    let mut down: Option<String> = None;

    let load_failed = |reason: String| FileError::LoadFailed {
        name: name.to_string(),
        reason,
    };

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();

        if trimmed.eq_ignore_ascii_case(UP_MARKER) {
            if up.is_some() {
                return Err(load_failed(format!("duplicate `{UP_MARKER}` on line {}", idx + 1)).into());
            }
            up = Some(String::new());
            section = Section::Up;
            continue;
        }
        if trimmed.eq_ignore_ascii_case(DOWN_MARKER) {
            if down.is_some() {
                return Err(
                    load_failed(format!("duplicate `{DOWN_MARKER}` on line {}", idx + 1)).into(),
                );
            }
            down = Some(String::new());
            section = Section::Down;
            continue;
        }

        let target = match section {
            Section::Preamble => {
                if trimmed.is_empty() || trimmed.starts_with("--") {
                    continue;
                }
                return Err(load_failed(format!(
                    "SQL on line {} appears before any migrate marker",
                    idx + 1
                ))
                .into());
            }
            Section::Up => up.as_mut(),
            Section::Down => down.as_mut(),
        };
        if let Some(buf) = target {
            buf.push_str(line);
            buf.push('\n');
        }
    }

    Ok(Sections {
        up: up.filter(|sql| !sql.trim().is_empty()),
        down: down.filter(|sql| !sql.trim().is_empty()),
    })
}

fn sql_operation(sql: &str) -> Operation {
    let sql: Arc<str> = Arc::from(sql);
    Arc::new(move |conn: &Connection| -> anyhow::Result<()> {
        conn.execute_batch(&sql)?;
        Ok(())
    })
}

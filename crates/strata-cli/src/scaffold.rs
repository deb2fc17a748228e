use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::info;

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));
static SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_").expect("sequence pattern is valid"));

/// Write `NNN_<slug>.sql` with empty up and down sections, numbered one past
/// the highest existing file.
pub fn create(dir: &Path, description: &str) -> Result<PathBuf> {
    let slug = slugify(description);
    if slug.is_empty() {
        bail!("description {description:?} has no usable characters");
    }

    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let path = dir.join(format!("{:03}_{slug}.sql", next_sequence(dir)?));
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let body = format!("-- {}\n-- migrate:up\n\n-- migrate:down\n", description.trim());
    fs::write(&path, body).with_context(|| format!("cannot write {}", path.display()))?;

    info!("created migration {}", path.display());
    Ok(path)
}

fn slugify(description: &str) -> String {
    NON_SLUG
        .replace_all(&description.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

fn next_sequence(dir: &Path) -> Result<u64> {
    let mut highest = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_none_or(|ext| ext != "sql") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(n) = SEQUENCE
            .captures(stem)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            highest = highest.max(n);
        }
    }
    Ok(highest + 1)
}

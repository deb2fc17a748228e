use std::io::IsTerminal;

use anyhow::{Context, Result, bail};
use dialoguer::Confirm;

/// Ask before clearing the migration lock. Without a terminal there is no
/// one to ask, so the caller must pass `--yes`.
pub fn confirm_unlock(lock_table: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("non-interactive session: pass --yes to clear the lock in {lock_table}");
    }

    println!();
    println!("  Clearing the lock lets another run start immediately.");
    println!("  Only do this if no migration is in progress.");
    println!();

    Confirm::new()
        .with_prompt(format!("Force-release the lock in {lock_table}?"))
        .default(false)
        .interact()
        .context("unlock confirmation cancelled")
}

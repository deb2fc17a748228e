//! The persistent migration lock.
//!
//! The flag lives in the database, so it serializes engines across
//! processes, not just threads. There is no expiry: a holder that dies
//! before releasing leaves the flag set until [`force_release`] is run.

use rusqlite::{Connection, TransactionBehavior};
use strata_common::{Error, Result};
use tracing::{info, warn};

use crate::schema::TableNames;

/// Flip the lock from free to held inside its own transaction, or fail
/// immediately with [`Error::Lock`] if it is already held.
pub fn acquire(conn: &mut Connection, tables: &TableNames) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::Migration(format!("failed to begin lock transaction: {e}")))?;

    let locked = read_flag(&tx, tables)?;
    if locked {
        // Dropping the transaction rolls it back.
        return Err(Error::Lock(
            "migration lock is held by another operation".into(),
        ));
    }

    tx.execute(
        &format!("UPDATE {} SET locked = 1 WHERE id = 1", tables.lock_sql()),
        [],
    )
    .map_err(|e| Error::Migration(format!("failed to set migration lock: {e}")))?;
    tx.commit()
        .map_err(|e| Error::Migration(format!("failed to commit migration lock: {e}")))?;

    info!("acquired migration lock");
    Ok(())
}

/// Clear the lock regardless of its current state.
pub fn release(conn: &Connection, tables: &TableNames) -> Result<()> {
    conn.execute(
        &format!("UPDATE {} SET locked = 0 WHERE id = 1", tables.lock_sql()),
        [],
    )
    .map_err(|e| Error::Migration(format!("failed to release migration lock: {e}")))?;

    info!("released migration lock");
    Ok(())
}

/// Manual reset after a crashed holder. Same write as [`release`], logged
/// loudly because it bypasses mutual exclusion.
pub fn force_release(conn: &Connection, tables: &TableNames) -> Result<bool> {
    let was_locked = is_locked(conn, tables)?;
    if was_locked {
        warn!("forcing release of a held migration lock");
    }
    release(conn, tables)?;
    Ok(was_locked)
}

pub fn is_locked(conn: &Connection, tables: &TableNames) -> Result<bool> {
    read_flag(conn, tables)
}

fn read_flag(conn: &Connection, tables: &TableNames) -> Result<bool> {
    let locked: i64 = conn
        .query_row(
            &format!("SELECT locked FROM {} WHERE id = 1", tables.lock_sql()),
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Migration(format!("failed to read migration lock: {e}")))?;
    Ok(locked != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_schema;

    fn setup() -> (Connection, TableNames) {
        let conn = Connection::open_in_memory().unwrap();
        let tables = TableNames::default();
        ensure_schema(&conn, &tables).unwrap();
        (conn, tables)
    }

    #[test]
    fn acquire_then_release() {
        let (mut conn, tables) = setup();
        assert!(!is_locked(&conn, &tables).unwrap());

        acquire(&mut conn, &tables).unwrap();
        assert!(is_locked(&conn, &tables).unwrap());

        release(&conn, &tables).unwrap();
        assert!(!is_locked(&conn, &tables).unwrap());
    }

    #[test]
    fn second_acquire_fails_fast() {
        let (mut conn, tables) = setup();
        acquire(&mut conn, &tables).unwrap();

        let err = acquire(&mut conn, &tables).unwrap_err();
        assert!(err.is_lock(), "unexpected error: {err}");
        assert!(is_locked(&conn, &tables).unwrap());
    }

    #[test]
    fn release_is_idempotent() {
        let (conn, tables) = setup();
        release(&conn, &tables).unwrap();
        release(&conn, &tables).unwrap();
        assert!(!is_locked(&conn, &tables).unwrap());
    }

    #[test]
    fn force_release_reports_prior_state() {
        let (mut conn, tables) = setup();
        assert!(!force_release(&conn, &tables).unwrap());

        acquire(&mut conn, &tables).unwrap();
        assert!(force_release(&conn, &tables).unwrap());
        assert!(!is_locked(&conn, &tables).unwrap());
    }

    #[test]
    fn missing_lock_row_surfaces_as_migration_error() {
        let (mut conn, tables) = setup();
        conn.execute("DELETE FROM schema_migrations_lock", []).unwrap();
        let err = acquire(&mut conn, &tables).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }
}

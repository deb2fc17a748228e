use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use strata_common::{Error, Result};

use crate::schema::TableNames;

/// One applied migration as recorded in the ledger table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub name: String,
    pub executed_at: DateTime<Utc>,
    pub batch: i64,
}

/// `max(batch)`, or 0 for an empty ledger.
pub fn current_batch(conn: &Connection, tables: &TableNames) -> Result<i64> {
    conn.query_row(
        &format!("SELECT COALESCE(MAX(batch), 0) FROM {}", tables.ledger_sql()),
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Migration(format!("failed to query current batch: {e}")))
}

pub fn applied_names(conn: &Connection, tables: &TableNames) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("SELECT name FROM {}", tables.ledger_sql()))
        .map_err(|e| Error::Migration(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Migration(format!("failed to query applied migrations: {e}")))?;

    rows.collect::<std::result::Result<HashSet<_>, _>>()
        .map_err(|e| Error::Migration(format!("failed to read ledger row: {e}")))
}

/// Every row, ordered by batch then name.
pub fn all_rows(conn: &Connection, tables: &TableNames) -> Result<Vec<LedgerRow>> {
    query_rows(
        conn,
        &format!(
            "SELECT name, executed_at, batch FROM {} ORDER BY batch ASC, name ASC",
            tables.ledger_sql()
        ),
        [],
    )
}

/// Rows of one batch in reverse application order.
pub fn batch_rows_desc(conn: &Connection, tables: &TableNames, batch: i64) -> Result<Vec<LedgerRow>> {
    query_rows(
        conn,
        &format!(
            "SELECT name, executed_at, batch FROM {} WHERE batch = ?1 ORDER BY name DESC",
            tables.ledger_sql()
        ),
        params![batch],
    )
}

pub fn insert(conn: &Connection, tables: &TableNames, name: &str, batch: i64) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (name, executed_at, batch) VALUES (?1, ?2, ?3)",
            tables.ledger_sql()
        ),
        params![name, Utc::now().to_rfc3339(), batch],
    )
    .map_err(|e| Error::Migration(format!("failed to record migration {name}: {e}")))?;
    Ok(())
}

pub fn delete(conn: &Connection, tables: &TableNames, name: &str) -> Result<()> {
    let removed = conn
        .execute(
            &format!("DELETE FROM {} WHERE name = ?1", tables.ledger_sql()),
            params![name],
        )
        .map_err(|e| Error::Migration(format!("failed to remove migration {name}: {e}")))?;

    if removed == 0 {
        return Err(Error::Migration(format!(
            "migration {name} was not recorded in the ledger"
        )));
    }
    Ok(())
}

fn query_rows<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<LedgerRow>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Migration(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .map_err(|e| Error::Migration(format!("failed to query ledger: {e}")))?;

    let mut ledger = Vec::new();
    for row in rows {
        let (name, executed_at, batch) =
            row.map_err(|e| Error::Migration(format!("failed to read ledger row: {e}")))?;
        let executed_at = parse_datetime(&name, &executed_at)?;
        ledger.push(LedgerRow {
            name,
            executed_at,
            batch,
        });
    }
    Ok(ledger)
}

fn parse_datetime(name: &str, s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS".
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            Error::Migration(format!(
                "migration {name} has an unreadable executed_at {s:?}"
            ))
        })
}

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use strata_db::{CodeSource, Migrator, MigratorOptions, SqlDirectorySource};

fn slow_source() -> CodeSource {
    CodeSource::new()
        .migration(
            "001_slow",
            |conn| {
                thread::sleep(Duration::from_millis(200));
                conn.execute_batch("CREATE TABLE slow (id INTEGER PRIMARY KEY);")?;
                Ok(())
            },
            |conn| {
                conn.execute_batch("DROP TABLE slow;")?;
                Ok(())
            },
        )
        .sql(
            "002_fast",
            "CREATE TABLE fast (id INTEGER PRIMARY KEY);",
            "DROP TABLE fast;",
        )
}

fn ledger_count(db: &Path) -> i64 {
    let conn = Connection::open(db).unwrap();
    conn.query_row("SELECT count(*) FROM schema_migrations", [], |row| row.get(0))
        .unwrap()
}

fn set_lock(db: &Path, locked: bool) {
    let conn = Connection::open(db).unwrap();
    conn.execute(
        "UPDATE schema_migrations_lock SET locked = ?1 WHERE id = 1",
        [locked as i64],
    )
    .unwrap();
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");

    {
        let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
        assert!(m.apply().success);
    }

    let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
    let status = m.status().unwrap();
    assert_eq!(status.current_batch, 1);
    assert_eq!(status.pending, 0);
    assert!(m.plan().unwrap().pending_migrations.is_empty());

    let again = m.apply();
    assert!(again.success);
    assert!(again.applied_migrations.is_empty());
}

#[test]
fn file_databases_use_wal() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
    m.status().unwrap();

    let conn = Connection::open(&db).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn lock_held_elsewhere_blocks_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
    assert!(!m.is_locked().unwrap());

    set_lock(&db, true);

    let result = m.apply();
    assert!(!result.success);
    assert!(result.error.unwrap().is_lock());
    assert_eq!(ledger_count(&db), 0);

    let result = m.rollback();
    assert!(result.error.unwrap().is_lock());

    // A refused operation must not clear someone else's lock.
    assert!(m.is_locked().unwrap());

    set_lock(&db, false);
    let result = m.apply();
    assert!(result.success);
    assert_eq!(result.applied_migrations, vec!["001_slow", "002_fast"]);
    assert_eq!(ledger_count(&db), 2);
}

#[test]
fn stuck_lock_needs_force_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
    m.status().unwrap();

    // Simulates a holder that died after taking the lock.
    set_lock(&db, true);
    drop(m);

    let m = Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap();
    assert!(m.apply().error.unwrap().is_lock());
    assert!(m.force_unlock().unwrap());
    assert!(!m.force_unlock().unwrap());
    assert!(m.apply().success);
}

#[test]
fn concurrent_engines_apply_each_migration_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");

    let engines: Vec<Migrator> = (0..4)
        .map(|_| Migrator::open(&db, slow_source(), MigratorOptions::default()).unwrap())
        .collect();
    let barrier = Arc::new(Barrier::new(engines.len()));

    let handles: Vec<_> = engines
        .into_iter()
        .map(|m| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                m.apply()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let applied: Vec<&String> = results
        .iter()
        .flat_map(|r| r.applied_migrations.iter())
        .collect();
    assert_eq!(applied.len(), 2, "each migration must run exactly once");

    for result in &results {
        if let Some(err) = &result.error {
            assert!(err.is_lock(), "unexpected failure: {err}");
        }
    }

    let conn = Connection::open(&db).unwrap();
    let (rows, max_batch): (i64, i64) = conn
        .query_row(
            "SELECT count(*), max(batch) FROM schema_migrations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rows, 2);
    assert_eq!(max_batch, 1);

    let locked: i64 = conn
        .query_row("SELECT locked FROM schema_migrations_lock", [], |row| row.get(0))
        .unwrap();
    assert_eq!(locked, 0);
}

#[test]
fn sql_directory_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("001_users.sql"),
        "-- users table\n-- migrate:up\nCREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);\n\n-- migrate:down\nDROP TABLE users;\n",
    )
    .unwrap();
    std::fs::write(
        migrations.join("002_seed.sql"),
        "-- migrate:up\nINSERT INTO users (email) VALUES ('a@example.com');\nINSERT INTO users (email) VALUES ('b@example.com');\n-- migrate:down\nDELETE FROM users;\n",
    )
    .unwrap();
    std::fs::write(migrations.join("README.md"), "not a migration").unwrap();

    let db = dir.path().join("app.db");
    let m = Migrator::open(
        &db,
        SqlDirectorySource::new(&migrations),
        MigratorOptions::default(),
    )
    .unwrap();

    let result = m.apply();
    assert!(result.success, "apply failed: {:?}", result.error);
    assert_eq!(result.applied_migrations, vec!["001_users", "002_seed"]);

    let users: i64 = Connection::open(&db)
        .unwrap()
        .query_row("SELECT count(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 2);

    let result = m.rollback();
    assert_eq!(result.applied_migrations, vec!["002_seed", "001_users"]);
    assert_eq!(ledger_count(&db), 0);
}

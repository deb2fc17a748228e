//! CLI integration tests for strata.
//!
//! Each test works in its own temp directory with an explicit database and
//! migrations directory, so no config file or environment leaks in.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("strata").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("STRATA_DATABASE")
        .env_remove("STRATA_MIGRATIONS_DIR")
        .env_remove("STRATA_LEDGER_TABLE")
        .env_remove("STRATA_LOCK_TABLE")
        .env("RUST_LOG", "off");
    cmd
}

fn write_migration(dir: &Path, file: &str, up: &str, down: &str) {
    let migrations = dir.join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    fs::write(
        migrations.join(file),
        format!("-- migrate:up\n{up}\n-- migrate:down\n{down}\n"),
    )
    .unwrap();
}

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        "DROP TABLE users;",
    );
    write_migration(
        dir.path(),
        "002_posts.sql",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY);",
        "DROP TABLE posts;",
    );
    dir
}

// =============================================================================
// Help
// =============================================================================

#[test]
fn help_lists_all_commands() {
    let dir = tempfile::tempdir().unwrap();
    cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("unlock"))
        .stdout(predicate::str::contains("new"));
}

#[test]
fn no_subcommand_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    cmd(&dir).assert().failure();
}

// =============================================================================
// Apply / rollback
// =============================================================================

#[test]
fn apply_then_rollback() {
    let dir = project();

    cmd(&dir)
        .args(["plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Batch 1 would apply"))
        .stdout(predicate::str::contains("001_users"));

    cmd(&dir)
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 2 migration(s)"))
        .stdout(predicate::str::contains("002_posts"));

    cmd(&dir)
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do."));

    cmd(&dir)
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back 2 migration(s)"));

    assert!(dir.path().join("strata.db").exists());
}

#[test]
fn failing_migration_exits_with_code_1() {
    let dir = project();
    write_migration(dir.path(), "003_broken.sql", "CREATE TABLE (", "SELECT 1;");

    cmd(&dir)
        .arg("apply")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to apply migration 003_broken"));

    cmd(&dir)
        .args(["--json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"current_batch\": 0"))
        .stdout(predicate::str::contains("\"pending\": 3"));
}

#[test]
fn json_output_for_apply() {
    let dir = project();
    let output = cmd(&dir).args(["--json", "apply"]).output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["migrations"][0], "001_users");
    assert_eq!(value["migrations"][1], "002_posts");
    assert!(value["error"].is_null());
}

#[test]
fn missing_migrations_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    cmd(&dir)
        .args(["--dir", "nowhere", "apply"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("migration source unavailable"));
}

// =============================================================================
// Lock
// =============================================================================

#[test]
fn held_lock_blocks_apply_until_unlocked() {
    let dir = project();
    cmd(&dir).arg("status").assert().success();

    let conn = rusqlite_conn(&dir.path().join("strata.db"));
    conn.execute("UPDATE schema_migrations_lock SET locked = 1", [])
        .unwrap();

    cmd(&dir)
        .arg("apply")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("lock error"));

    // No terminal and no --yes: refuse.
    cmd(&dir).arg("unlock").assert().failure();

    cmd(&dir)
        .args(["unlock", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migration lock released."));

    cmd(&dir).arg("apply").assert().success();
}

fn rusqlite_conn(path: &Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn config_file_sets_paths_and_tables() {
    let dir = tempfile::tempdir().unwrap();
    let sql_dir = dir.path().join("db").join("migrations");
    fs::create_dir_all(&sql_dir).unwrap();
    fs::write(
        sql_dir.join("001_users.sql"),
        "-- migrate:up\nCREATE TABLE users (id INTEGER);\n-- migrate:down\nDROP TABLE users;\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("strata.yml"),
        "database:\n  path: app.db\nmigrations:\n  directory: db/migrations\n  ledger_table: ledger\n  lock_table: ledger_lock\n",
    )
    .unwrap();

    cmd(&dir).arg("apply").assert().success();

    let conn = rusqlite_conn(&dir.path().join("app.db"));
    let rows: i64 = conn
        .query_row("SELECT count(*) FROM ledger", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn invalid_table_name_in_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("strata.yml"),
        "migrations:\n  ledger_table: \"drop table; --\"\n",
    )
    .unwrap();

    cmd(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

// =============================================================================
// Scaffolding
// =============================================================================

#[test]
fn new_creates_numbered_files() {
    let dir = tempfile::tempdir().unwrap();

    cmd(&dir)
        .args(["new", "Create users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("001_create_users.sql"));

    cmd(&dir)
        .args(["new", "add posts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("002_add_posts.sql"));

    assert!(dir.path().join("migrations/002_add_posts.sql").is_file());
}

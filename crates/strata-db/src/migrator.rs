use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use strata_common::{Direction, Error, FileError, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogSource, MigrationUnit};
use crate::events::{EventBus, MigrationEvent};
use crate::ledger::{self, LedgerRow};
use crate::lock;
use crate::schema::{TableNames, ensure_schema};

#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub tables: TableNames,
    /// How long SQLite waits for a competing writer. Unrelated to the
    /// migration lock, which never waits.
    pub busy_timeout: Duration,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of [`Migrator::apply`] or [`Migrator::rollback`].
#[derive(Debug)]
pub struct BatchResult {
    pub success: bool,
    pub error: Option<Error>,
    /// Names applied (or rolled back), in execution order.
    pub applied_migrations: Vec<String>,
}

impl BatchResult {
    fn succeeded(applied_migrations: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            applied_migrations,
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            success: false,
            error: Some(error),
            applied_migrations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub current_batch: i64,
    pub pending: usize,
    pub applied: Vec<LedgerRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub next_batch: i64,
    pub pending_migrations: Vec<String>,
}

/// Applies and reverts batches of migrations against one SQLite database.
///
/// `apply` and `rollback` are guarded by the persistent lock and never
/// return `Err`; failures come back inside [`BatchResult`]. `status` and
/// `plan` are lock-free snapshots and return errors directly.
pub struct Migrator {
    state: Mutex<EngineState>,
    source: Box<dyn CatalogSource>,
    tables: TableNames,
    events: EventBus,
}

struct EngineState {
    conn: Connection,
    schema_ready: bool,
    catalog: Option<Arc<Catalog>>,
}

impl Migrator {
    pub fn open(
        db_path: &Path,
        source: impl CatalogSource + 'static,
        options: MigratorOptions,
    ) -> Result<Self> {
        info!("opening migration database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Migration(format!("failed to open database: {e}")))?;

        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| Error::Migration(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Migration(format!("failed to set pragmas: {e}")))?;

        Self::from_connection(conn, source, options)
    }

    pub fn in_memory(source: impl CatalogSource + 'static, options: MigratorOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Migration(format!("failed to open in-memory database: {e}")))?;
        Self::from_connection(conn, source, options)
    }

    /// Wrap an existing connection. Nothing is read or written until the
    /// first operation.
    pub fn from_connection(
        conn: Connection,
        source: impl CatalogSource + 'static,
        options: MigratorOptions,
    ) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| Error::Migration(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            state: Mutex::new(EngineState {
                conn,
                schema_ready: false,
                catalog: None,
            }),
            source: Box::new(source),
            tables: options.tables,
            events: EventBus::new(),
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MigrationEvent> {
        self.events.subscribe()
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Run every pending migration as one new batch.
    pub fn apply(&self) -> BatchResult {
        self.run_batch(Direction::Apply)
    }

    /// Revert the most recent batch.
    pub fn rollback(&self) -> BatchResult {
        self.run_batch(Direction::Rollback)
    }

    pub fn status(&self) -> Result<MigrationStatus> {
        let mut state = self.state()?;
        let catalog = self.prepare(&mut state)?;

        let applied = ledger::all_rows(&state.conn, &self.tables)?;
        let current_batch = ledger::current_batch(&state.conn, &self.tables)?;
        let recorded: HashSet<&str> = applied.iter().map(|row| row.name.as_str()).collect();
        let pending = catalog
            .iter()
            .filter(|unit| !recorded.contains(unit.name()))
            .count();

        Ok(MigrationStatus {
            current_batch,
            pending,
            applied,
        })
    }

    /// Advisory: `apply` recomputes the pending set under the lock.
    pub fn plan(&self) -> Result<MigrationPlan> {
        let mut state = self.state()?;
        let catalog = self.prepare(&mut state)?;

        let current_batch = ledger::current_batch(&state.conn, &self.tables)?;
        let pending_migrations = pending_units(&state.conn, &self.tables, &catalog)?
            .into_iter()
            .map(|unit| unit.name().to_string())
            .collect();

        Ok(MigrationPlan {
            next_batch: current_batch + 1,
            pending_migrations,
        })
    }

    /// Re-read the catalog source. On failure the previously loaded catalog
    /// stays in effect.
    pub fn reload_catalog(&self) -> Result<usize> {
        let catalog = Catalog::load(self.source.as_ref())?;
        let count = catalog.len();

        let mut state = self.state()?;
        state.catalog = Some(Arc::new(catalog));
        info!("reloaded {count} migrations from {}", self.source.describe());
        Ok(count)
    }

    pub fn is_locked(&self) -> Result<bool> {
        let mut state = self.state()?;
        self.ensure_schema_ready(&mut state)?;
        lock::is_locked(&state.conn, &self.tables)
    }

    /// Clear a lock left behind by a crashed process. Returns whether the
    /// lock was held.
    pub fn force_unlock(&self) -> Result<bool> {
        let mut state = self.state()?;
        self.ensure_schema_ready(&mut state)?;
        lock::force_release(&state.conn, &self.tables)
    }

    fn state(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| Error::Migration("migrator state lock poisoned".into()))
    }

    fn ensure_schema_ready(&self, state: &mut EngineState) -> Result<()> {
        if !state.schema_ready {
            ensure_schema(&state.conn, &self.tables)?;
            state.schema_ready = true;
        }
        Ok(())
    }

    fn prepare(&self, state: &mut EngineState) -> Result<Arc<Catalog>> {
        let catalog = match &state.catalog {
            Some(catalog) => Arc::clone(catalog),
            None => {
                let catalog = Arc::new(Catalog::load(self.source.as_ref())?);
                info!(
                    "loaded {} migrations from {}",
                    catalog.len(),
                    self.source.describe()
                );
                state.catalog = Some(Arc::clone(&catalog));
                catalog
            }
        };
        self.ensure_schema_ready(state)?;
        Ok(catalog)
    }

    fn run_batch(&self, direction: Direction) -> BatchResult {
        let outcome = self.state().and_then(|mut state| {
            let catalog = self.prepare(&mut state)?;
            self.with_lock(&mut state.conn, |conn| match direction {
                Direction::Apply => apply_batch(conn, &self.tables, &catalog),
                Direction::Rollback => rollback_batch(conn, &self.tables, &catalog),
            })
        });

        match outcome {
            Ok((batch, names)) => {
                for name in &names {
                    self.events.emit(match direction {
                        Direction::Apply => MigrationEvent::Applied {
                            name: name.clone(),
                            batch,
                        },
                        Direction::Rollback => MigrationEvent::RolledBack {
                            name: name.clone(),
                            batch,
                        },
                    });
                }
                BatchResult::succeeded(names)
            }
            Err(e) => {
                warn!("{direction} batch failed: {e}");
                BatchResult::failed(e)
            }
        }
    }

    /// Hold the persistent lock around `op`. The lock is released on every
    /// exit path, including a panic inside a migration operation.
    fn with_lock<T>(
        &self,
        conn: &mut Connection,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        lock::acquire(conn, &self.tables)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(conn))).unwrap_or_else(|payload| {
            Err(Error::Migration(format!(
                "migration panicked: {}",
                panic_message(&*payload)
            )))
        });

        if let Err(e) = lock::release(conn, &self.tables) {
            error!("migration lock may still be held: {e}");
        }
        outcome
    }

    #[cfg(test)]
    fn execute_raw(&self, sql: &str) {
        let state = self.state().unwrap();
        state.conn.execute_batch(sql).unwrap();
    }
}

fn pending_units<'a>(
    conn: &Connection,
    tables: &TableNames,
    catalog: &'a Catalog,
) -> Result<Vec<&'a MigrationUnit>> {
    let applied = ledger::applied_names(conn, tables)?;
    Ok(catalog
        .iter()
        .filter(|unit| !applied.contains(unit.name()))
        .collect())
}

fn apply_batch(
    conn: &mut Connection,
    tables: &TableNames,
    catalog: &Catalog,
) -> Result<(i64, Vec<String>)> {
    let batch = ledger::current_batch(conn, tables)? + 1;
    let pending = pending_units(conn, tables, catalog)?;
    if pending.is_empty() {
        info!("no pending migrations");
        return Ok((batch, Vec::new()));
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::Migration(format!("failed to begin batch {batch}: {e}")))?;

    let mut names = Vec::with_capacity(pending.len());
    for unit in pending {
        debug!("applying {} (batch {batch})", unit.name());
        unit.run_forward(&tx)
            .map_err(|e| execution_error(unit.name(), Direction::Apply, format!("{e:#}")))?;
        ledger::insert(&tx, tables, unit.name(), batch)
            .map_err(|e| execution_error(unit.name(), Direction::Apply, e.to_string()))?;
        names.push(unit.name().to_string());
    }

    tx.commit()
        .map_err(|e| Error::Migration(format!("failed to commit batch {batch}: {e}")))?;
    info!("applied {} migrations as batch {batch}", names.len());
    Ok((batch, names))
}

fn rollback_batch(
    conn: &mut Connection,
    tables: &TableNames,
    catalog: &Catalog,
) -> Result<(i64, Vec<String>)> {
    let batch = ledger::current_batch(conn, tables)?;
    if batch == 0 {
        info!("nothing to roll back");
        return Ok((0, Vec::new()));
    }

    // Resolve every unit before writing anything.
    let units = ledger::batch_rows_desc(conn, tables, batch)?
        .into_iter()
        .map(|row| {
            catalog
                .get(&row.name)
                .ok_or_else(|| Error::from(FileError::MissingUnit(row.name)))
        })
        .collect::<Result<Vec<_>>>()?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::Migration(format!("failed to begin rollback of batch {batch}: {e}")))?;

    let mut names = Vec::with_capacity(units.len());
    for unit in units {
        debug!("rolling back {} (batch {batch})", unit.name());
        unit.run_backward(&tx)
            .map_err(|e| execution_error(unit.name(), Direction::Rollback, format!("{e:#}")))?;
        ledger::delete(&tx, tables, unit.name())
            .map_err(|e| execution_error(unit.name(), Direction::Rollback, e.to_string()))?;
        names.push(unit.name().to_string());
    }

    tx.commit()
        .map_err(|e| Error::Migration(format!("failed to commit rollback of batch {batch}: {e}")))?;
    info!("rolled back {} migrations from batch {batch}", names.len());
    Ok((batch, names))
}

fn execution_error(name: &str, direction: Direction, cause: String) -> Error {
    Error::Execution {
        name: name.to_string(),
        direction,
        cause,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

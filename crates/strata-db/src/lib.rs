pub mod catalog;
pub mod events;
pub mod ledger;
pub mod lock;
pub mod migrator;
pub mod schema;
pub mod source;

pub use catalog::{Catalog, CatalogSource, MigrationCandidate, MigrationUnit, Operation};
pub use events::{EventBus, MigrationEvent};
pub use ledger::LedgerRow;
pub use migrator::{BatchResult, MigrationPlan, MigrationStatus, Migrator, MigratorOptions};
pub use schema::TableNames;
pub use source::{CodeSource, SqlDirectorySource};

//! Database backend abstraction
//!
//! These traits abstract the two concerns a migration run has against its
//! target connection: reading and mutating the progress ledger, and
//! executing DDL statements. Both ride the same connection, so they share
//! one seam. A [`StepUnit`] is the execution envelope for a single step:
//! transactional units apply the step's statements and its ledger mutation
//! atomically, and roll everything back when dropped without a commit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::MigroResult;
use crate::ledger::{LedgerEntry, LedgerFilter, LedgerRecord};

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

/// Target database seam for the migration engine
#[async_trait]
pub trait Backend: Send + Sync {
    /// Whether DDL statements participate in transactions on this backend.
    /// When false, steps run without a wrapping transaction and a mid-step
    /// failure can leave DDL applied with no ledger row.
    fn supports_ddl_transactions(&self) -> bool;

    /// Create the ledger table
    async fn install(&self) -> MigroResult<()>;

    /// Whether the ledger table exists
    async fn is_installed(&self) -> MigroResult<bool>;

    /// Highest applied step number for one `(table, tag)` lineage; 0 when
    /// nothing has been applied yet
    async fn max_step(&self, table: &str, tag: Option<&str>) -> MigroResult<i32>;

    /// Highest batch among rows matching the filter, if any
    async fn max_batch(&self, filter: &LedgerFilter) -> MigroResult<Option<i32>>;

    /// Ledger rows matching the filter
    async fn records(&self, filter: &LedgerFilter) -> MigroResult<Vec<LedgerRecord>>;

    /// Begin a transactional step unit
    async fn transaction(&self) -> MigroResult<Box<dyn StepUnit>>;

    /// Create a non-transactional step unit that applies work immediately
    async fn autocommit(&self) -> MigroResult<Box<dyn StepUnit>>;
}

/// Execution envelope for one step
///
/// Dropping a transactional unit without calling [`StepUnit::commit`]
/// discards everything it executed.
#[async_trait]
pub trait StepUnit: Send {
    /// Execute one DDL/SQL statement
    async fn execute(&mut self, sql: &str) -> MigroResult<()>;

    /// Insert a ledger row for a successfully applied step
    async fn insert_record(&mut self, entry: &LedgerEntry) -> MigroResult<()>;

    /// Delete a ledger row by id during rollback
    async fn delete_record(&mut self, id: i64) -> MigroResult<()>;

    /// Commit the unit's work
    async fn commit(self: Box<Self>) -> MigroResult<()>;
}

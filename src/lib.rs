//! # migro: step-based schema migrations
//!
//! A migration engine that turns registered manifest sources, each an
//! ordered sequence of schema-change steps for one `(table, tag)` lineage,
//! into a deterministic, resumable execution plan against a database.
//! Progress is persisted in an append-only ledger; applied step numbers for
//! every lineage always form a dense prefix, which makes re-running migrate
//! after a failure resume exactly at the failed step. Batches group the
//! steps of one invocation and are the unit of rollback.
//!
//! ```no_run
//! use std::sync::Arc;
//! use migro::{MigrateOptions, Migrator, PgBackend, SourceRegistry, TraceReporter};
//!
//! # async fn run() -> migro::MigroResult<()> {
//! let mut registry = SourceRegistry::new();
//! registry.register("users", |m| {
//!     m.create(|t| {
//!         t.id("id");
//!         t.string("name", Some(255));
//!     });
//!     m.modify(
//!         |t| {
//!             t.add_column("email", "VARCHAR(255)");
//!         },
//!         |t| {
//!             t.drop_column("email");
//!         },
//!     );
//! });
//!
//! let backend = PgBackend::connect("postgres://localhost/app").await?;
//! let migrator = Migrator::new(registry, backend).with_reporter(Arc::new(TraceReporter));
//!
//! migrator.install().await?;
//! let report = migrator.migrate(&MigrateOptions::default()).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod migrator;
pub mod registry;
pub mod reporter;
pub mod rollback;
pub mod schema;
pub mod status;
pub mod step;

pub use backend::{Backend, MemoryBackend, PgBackend, StepUnit};
pub use config::MigroConfig;
pub use error::{MigroError, MigroResult};
pub use ledger::{LedgerEntry, LedgerFilter, LedgerRecord, TagFilter};
pub use manifest::{Manifest, ManifestKey};
pub use migrator::{ManifestOutcome, MigrateOptions, MigrateReport, Migrator};
pub use registry::{Source, SourceRegistry};
pub use reporter::{NullReporter, Reporter, TraceReporter};
pub use rollback::{GroupOutcome, RollbackOptions, RollbackReport};
pub use schema::{TableAlteration, TableBlueprint};
pub use status::{ManifestStatus, StatusOptions, StatusReport, StepStatus};
pub use step::{HookPoint, Step, StepAction, StepKind};

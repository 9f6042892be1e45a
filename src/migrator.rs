//! Migration planner and executor, up direction
//!
//! Computes each manifest's pending step window against the progress
//! ledger and executes it in ascending step order. Every step's hooks,
//! DDL, and ledger insert run inside one transaction unless the step opted
//! out or the backend cannot wrap DDL, so a failure never leaves a ledger
//! row without its change. Manifests are independent units: one manifest's
//! failure aborts its own remaining steps but not its siblings; the report
//! carries the failure indicator for the run.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::Backend;
use crate::error::{MigroError, MigroResult};
use crate::ledger::{LedgerEntry, LedgerFilter, TagFilter};
use crate::manifest::{Manifest, ManifestKey};
use crate::registry::SourceRegistry;
use crate::reporter::{NullReporter, Reporter};
use crate::schema::{TableAlteration, TableBlueprint};
use crate::step::{HookPoint, Step, StepAction, StepKind};

/// Options for a migrate invocation
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Restrict to one logical table
    pub table: Option<String>,
    /// Process this tag's partition; absent selects the untagged partition
    pub tag: Option<String>,
    /// Maximum number of steps to apply per manifest
    pub steps_limit: Option<usize>,
}

/// Result of processing one manifest in the up direction
#[derive(Debug)]
pub struct ManifestOutcome {
    pub key: ManifestKey,
    /// Step numbers applied in this invocation, ascending
    pub applied: Vec<i32>,
    /// Steps below the pending window, reported but not re-run
    pub already_applied: usize,
    /// Steps cut off by the steps limit
    pub outside_limit: usize,
    /// The failure that aborted this manifest, if any
    pub error: Option<MigroError>,
    pub elapsed_ms: u128,
}

impl ManifestOutcome {
    fn new(key: ManifestKey) -> Self {
        Self {
            key,
            applied: Vec::new(),
            already_applied: 0,
            outside_limit: 0,
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Result of a migrate invocation
#[derive(Debug)]
pub struct MigrateReport {
    /// Batch number shared by every step applied in this invocation;
    /// `None` when nothing was applied
    pub batch: Option<i32>,
    pub manifests: Vec<ManifestOutcome>,
    pub elapsed_ms: u128,
}

impl MigrateReport {
    fn empty() -> Self {
        Self {
            batch: None,
            manifests: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Total steps applied across all manifests
    pub fn applied_count(&self) -> usize {
        self.manifests.iter().map(|m| m.applied.len()).sum()
    }

    /// Whether every manifest completed without failure
    pub fn is_success(&self) -> bool {
        self.manifests.iter().all(|m| m.error.is_none())
    }

    /// Manifests that failed, with their errors
    pub fn failures(&self) -> impl Iterator<Item = &ManifestOutcome> {
        self.manifests.iter().filter(|m| m.error.is_some())
    }
}

/// Migration engine over a source registry and a database backend
pub struct Migrator<B: Backend> {
    pub(crate) registry: SourceRegistry,
    pub(crate) backend: B,
    pub(crate) reporter: Arc<dyn Reporter>,
}

impl<B: Backend> Migrator<B> {
    pub fn new(registry: SourceRegistry, backend: B) -> Self {
        Self {
            registry,
            backend,
            reporter: Arc::new(NullReporter),
        }
    }

    /// Attach a lifecycle event consumer
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create the progress ledger table if it does not exist yet
    pub async fn install(&self) -> MigroResult<()> {
        if self.backend.is_installed().await? {
            tracing::debug!("ledger table already exists");
            return Ok(());
        }
        self.backend.install().await
    }

    /// Apply pending steps of every matching manifest, sharing one batch
    /// number across the whole invocation
    pub async fn migrate(&self, opts: &MigrateOptions) -> MigroResult<MigrateReport> {
        let start = Instant::now();

        // Absent tag selects the untagged partition only; tagged lineages
        // are migrated by naming their tag explicitly.
        let partition = match opts.tag.as_deref() {
            Some(tag) if !tag.is_empty() => TagFilter::Is(tag.to_string()),
            _ => TagFilter::Untagged,
        };
        let sources = self.registry.select(opts.table.as_deref(), &partition);

        let mut report = MigrateReport::empty();

        if sources.is_empty() {
            tracing::warn!("nothing to migrate");
            report.elapsed_ms = start.elapsed().as_millis();
            return Ok(report);
        }

        let batch = self
            .backend
            .max_batch(&LedgerFilter::default())
            .await?
            .unwrap_or(0)
            + 1;
        tracing::debug!(batch, manifests = sources.len(), "starting migrate run");

        for source in sources {
            let manifest = source.materialize();
            let outcome = self
                .process_manifest(&manifest, batch, opts.steps_limit)
                .await;
            report.manifests.push(outcome);
        }

        if report.applied_count() > 0 {
            report.batch = Some(batch);
        } else if report.is_success() {
            tracing::warn!("nothing to migrate");
        }
        report.elapsed_ms = start.elapsed().as_millis();

        Ok(report)
    }

    /// Run one manifest's pending window. Failures are captured in the
    /// outcome so sibling manifests keep running.
    async fn process_manifest(
        &self,
        manifest: &Manifest,
        batch: i32,
        steps_limit: Option<usize>,
    ) -> ManifestOutcome {
        let key = manifest.key().clone();
        let start = Instant::now();
        let mut outcome = ManifestOutcome::new(key.clone());

        let last_step = match self.backend.max_step(key.table(), key.tag()).await {
            Ok(n) => n,
            Err(e) => {
                outcome.error = Some(e);
                outcome.elapsed_ms = start.elapsed().as_millis();
                return outcome;
            }
        };

        let total = manifest.len();
        let window_start = (last_step as usize).min(total);
        let window_end = match steps_limit {
            Some(limit) => (window_start + limit).min(total),
            None => total,
        };

        self.reporter
            .manifest_started(&key, window_end - window_start, total);

        for step in &manifest.steps()[..window_start] {
            self.reporter.step_already_applied(&key, step.number());
            outcome.already_applied += 1;
        }
        for step in &manifest.steps()[window_start..window_end] {
            self.reporter.step_pending(&key, step.number());
        }
        for step in &manifest.steps()[window_end..] {
            self.reporter.step_outside_limit(&key, step.number());
            outcome.outside_limit += 1;
        }

        for step in &manifest.steps()[window_start..window_end] {
            self.reporter.step_started(&key, step.number());
            let step_start = Instant::now();

            match self.run_step_up(manifest, step, batch).await {
                Ok(()) => {
                    self.reporter
                        .step_succeeded(&key, step.number(), step_start.elapsed());
                    outcome.applied.push(step.number());
                }
                Err(e) => {
                    self.reporter.step_failed(&key, step.number(), &e);
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        if outcome.error.is_none() {
            self.reporter
                .manifest_completed(&key, outcome.applied.len(), start.elapsed());
        }
        outcome.elapsed_ms = start.elapsed().as_millis();
        outcome
    }

    /// Execute one step in the up direction: before-up hooks, DDL, ledger
    /// insert, after-up hooks, all inside one unit
    async fn run_step_up(&self, manifest: &Manifest, step: &Step, batch: i32) -> MigroResult<()> {
        let key = manifest.key().clone();
        let statements = up_statements(manifest, step)?;

        let transactional =
            !step.is_without_transaction() && self.backend.supports_ddl_transactions();
        let mut unit = if transactional {
            self.backend.transaction().await?
        } else {
            self.backend.autocommit().await?
        };

        let entry = LedgerEntry::new(&key, step.number(), batch);

        let result = async {
            run_hooks(step, HookPoint::BeforeUp, &key)?;
            for sql in &statements {
                unit.execute(sql).await?;
            }
            unit.insert_record(&entry).await?;
            run_hooks(step, HookPoint::AfterUp, &key)?;
            Ok::<(), MigroError>(())
        }
        .await;

        match result {
            Ok(()) => unit
                .commit()
                .await
                .map_err(|e| MigroError::step_failure(key, step.number(), transactional, e)),
            Err(e) => {
                // dropping an uncommitted transactional unit rolls it back
                drop(unit);
                Err(MigroError::step_failure(key, step.number(), transactional, e))
            }
        }
    }
}

pub(crate) fn run_hooks(step: &Step, point: HookPoint, key: &ManifestKey) -> MigroResult<()> {
    step.run_hooks(point).map_err(|source| MigroError::Hook {
        key: key.clone(),
        number: step.number(),
        point,
        source: source.into(),
    })
}

/// Compile a step's up action into SQL statements, validating that the
/// action shape matches the step kind
pub(crate) fn up_statements(manifest: &Manifest, step: &Step) -> MigroResult<Vec<String>> {
    match (step.kind(), step.up()) {
        (StepKind::Create, StepAction::Define(define)) => {
            let mut blueprint = TableBlueprint::new(manifest.table());
            define(&mut blueprint);
            Ok(vec![blueprint.to_sql()])
        }
        (StepKind::Modify, StepAction::Change(change)) => {
            let mut alteration = TableAlteration::new(manifest.table());
            change(&mut alteration);
            Ok(alteration.to_sql())
        }
        (StepKind::Raw, StepAction::Raw(raw)) => Ok(raw(manifest, step)),
        (kind, action) => Err(MigroError::InvalidStep {
            key: manifest.key().clone(),
            number: step.number(),
            reason: format!("{} step cannot run up from {}", kind, action.shape()),
        }),
    }
}

/// Compile a step's down action into SQL statements. Create steps roll
/// back as DROP TABLE IF EXISTS; modify and raw steps require their
/// explicit down action.
pub(crate) fn down_statements(manifest: &Manifest, step: &Step) -> MigroResult<Vec<String>> {
    match (step.kind(), step.down()) {
        (StepKind::Create, _) => Ok(vec![format!(
            "DROP TABLE IF EXISTS {};",
            manifest.table()
        )]),
        (StepKind::Modify, Some(StepAction::Change(change))) => {
            let mut alteration = TableAlteration::new(manifest.table());
            change(&mut alteration);
            Ok(alteration.to_sql())
        }
        (StepKind::Raw, Some(StepAction::Raw(raw))) => Ok(raw(manifest, step)),
        (kind, Some(action)) => Err(MigroError::InvalidStep {
            key: manifest.key().clone(),
            number: step.number(),
            reason: format!("{} step cannot run down from {}", kind, action.shape()),
        }),
        (kind, None) => Err(MigroError::InvalidStep {
            key: manifest.key().clone(),
            number: step.number(),
            reason: format!("{} step has no down action", kind),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::reporter::recording::RecordingReporter;

    fn users_registry() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register("users", |m| {
            m.create(|t| {
                t.id("id");
                t.string("name", Some(255));
            });
            m.modify(
                |t| {
                    t.add_column("email", "VARCHAR(255)");
                },
                |t| {
                    t.drop_column("email");
                },
            );
        });
        registry
    }

    fn migrator(registry: SourceRegistry, backend: MemoryBackend) -> Migrator<MemoryBackend> {
        Migrator::new(registry, backend)
    }

    #[tokio::test]
    async fn migrate_applies_all_pending_steps() {
        let backend = MemoryBackend::new();
        let migrator = migrator(users_registry(), backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.batch, Some(1));
        assert_eq!(report.applied_count(), 2);
        assert_eq!(backend.applied_steps("users", None), vec![1, 2]);

        let statements = backend.statements();
        assert!(statements[0].contains("CREATE TABLE users"));
        assert!(statements[1].contains("ADD COLUMN email"));
    }

    #[tokio::test]
    async fn migrate_twice_is_idempotent() {
        let backend = MemoryBackend::new();
        let migrator = migrator(users_registry(), backend.clone());

        migrator.migrate(&MigrateOptions::default()).await.unwrap();
        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.applied_count(), 0);
        assert_eq!(report.batch, None);
        assert_eq!(report.manifests[0].already_applied, 2);
        assert_eq!(backend.rows().len(), 2);
    }

    #[tokio::test]
    async fn steps_limit_truncates_the_pending_window() {
        let mut registry = SourceRegistry::new();
        registry.register("counters", |m| {
            m.create(|t| {
                t.id("id");
            });
            for column in ["a", "b", "c", "d"] {
                m.modify(
                    move |t| {
                        t.add_column(column, "INTEGER");
                    },
                    move |t| {
                        t.drop_column(column);
                    },
                );
            }
        });

        let backend = MemoryBackend::new();
        let migrator = migrator(registry, backend.clone());

        // apply steps 1 and 2 first
        migrator
            .migrate(&MigrateOptions {
                steps_limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(backend.applied_steps("counters", None), vec![1, 2]);

        // next limited run selects exactly steps 3 and 4; step 5 is outside
        let report = migrator
            .migrate(&MigrateOptions {
                steps_limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = &report.manifests[0];
        assert_eq!(outcome.applied, vec![3, 4]);
        assert_eq!(outcome.already_applied, 2);
        assert_eq!(outcome.outside_limit, 1);
        assert_eq!(backend.applied_steps("counters", None), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn manifests_in_one_invocation_share_a_batch() {
        let mut registry = users_registry();
        registry.register("posts", |m| {
            m.create(|t| {
                t.id("id");
            });
        });

        let backend = MemoryBackend::new();
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();
        assert_eq!(report.batch, Some(1));
        assert!(backend.rows().iter().all(|r| r.batch == 1));

        // a later invocation with new steps gets the next batch
        let mut registry = users_registry();
        registry.register("posts", |m| {
            m.create(|t| {
                t.id("id");
            });
            m.modify(
                |t| {
                    t.add_column("title", "TEXT");
                },
                |t| {
                    t.drop_column("title");
                },
            );
        });
        let migrator = Migrator::new(registry, backend.clone());
        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        assert_eq!(report.batch, Some(2));
        let posts_batches: Vec<i32> = backend
            .rows()
            .iter()
            .filter(|r| r.table == "posts")
            .map(|r| r.batch)
            .collect();
        assert_eq!(posts_batches, vec![1, 2]);
    }

    #[tokio::test]
    async fn failed_manifest_does_not_cancel_siblings() {
        let mut registry = SourceRegistry::new();
        registry.register("accounts", |m| {
            m.create(|t| {
                t.id("id");
            });
            m.raw(
                |_, _| vec!["UPDATE accounts SET broken = 1;".to_string()],
                |_, _| vec![],
            );
        });
        registry.register("users", |m| {
            m.create(|t| {
                t.id("id");
            });
        });

        let backend = MemoryBackend::new().fail_on_statement("broken");
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);

        // accounts kept its prefix, users still ran
        assert_eq!(backend.applied_steps("accounts", None), vec![1]);
        assert_eq!(backend.applied_steps("users", None), vec![1]);

        let failed = report.failures().next().unwrap();
        assert_eq!(failed.key.table(), "accounts");
        assert!(matches!(
            failed.error,
            Some(MigroError::StepAborted { number: 2, .. })
        ));
    }

    #[tokio::test]
    async fn transactional_failure_discards_the_whole_step() {
        let mut registry = SourceRegistry::new();
        registry.register("users", |m| {
            m.raw(
                |_, _| {
                    vec![
                        "CREATE TABLE users_shadow (id SERIAL);".to_string(),
                        "UPDATE broken;".to_string(),
                    ]
                },
                |_, _| vec![],
            );
        });

        let backend = MemoryBackend::new().fail_on_statement("broken");
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();
        assert!(!report.is_success());

        // the statement before the failure was rolled back with it
        assert!(backend.statements().is_empty());
        assert!(backend.rows().is_empty());
    }

    #[tokio::test]
    async fn non_transactional_failure_leaves_partial_work() {
        let mut registry = SourceRegistry::new();
        registry.register("users", |m| {
            m.raw(
                |_, _| {
                    vec![
                        "CREATE TABLE users_shadow (id SERIAL);".to_string(),
                        "UPDATE broken;".to_string(),
                    ]
                },
                |_, _| vec![],
            );
        });

        let backend = MemoryBackend::new()
            .without_ddl_transactions()
            .fail_on_statement("broken");
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        let failed = report.failures().next().unwrap();
        assert!(matches!(
            failed.error,
            Some(MigroError::StepUnreconciled { .. })
        ));

        // the first statement took effect, the ledger row was never written
        assert_eq!(backend.statements().len(), 1);
        assert!(backend.rows().is_empty());
    }

    #[tokio::test]
    async fn opted_out_step_runs_without_a_transaction() {
        let mut registry = SourceRegistry::new();
        registry.register("users", |m| {
            m.raw(
                |_, _| {
                    vec![
                        "CREATE TABLE users_shadow (id SERIAL);".to_string(),
                        "UPDATE broken;".to_string(),
                    ]
                },
                |_, _| vec![],
            )
            .without_transaction();
        });

        // the backend supports transactional DDL; the step opted out anyway
        let backend = MemoryBackend::new().fail_on_statement("broken");
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();

        let failed = report.failures().next().unwrap();
        assert!(matches!(
            failed.error,
            Some(MigroError::StepUnreconciled { number: 1, .. })
        ));

        // the first statement took effect immediately, unlike the
        // transactional path where the whole step is discarded
        assert_eq!(backend.statements().len(), 1);
        assert!(backend.rows().is_empty());
    }

    #[tokio::test]
    async fn hook_failure_aborts_the_step_before_commit() {
        let mut registry = SourceRegistry::new();
        registry.register("users", |m| {
            m.create(|t| {
                t.id("id");
            })
            .hook(HookPoint::AfterUp, || anyhow::bail!("after-up rejected"));
        });

        let backend = MemoryBackend::new();
        let migrator = migrator(registry, backend.clone());

        let report = migrator.migrate(&MigrateOptions::default()).await.unwrap();
        assert!(!report.is_success());

        // DDL and ledger insert rolled back together with the hook failure
        assert!(backend.statements().is_empty());
        assert!(backend.rows().is_empty());

        let failed = report.failures().next().unwrap();
        let err = failed.error.as_ref().unwrap();
        assert!(err.to_string().contains("rolled back"));
    }

    #[tokio::test]
    async fn raw_steps_receive_their_context() {
        let mut registry = SourceRegistry::new();
        registry.register("events", |m| {
            m.raw(
                |manifest, step| {
                    vec![format!(
                        "COMMENT ON TABLE {} IS 'step {}';",
                        manifest.table(),
                        step.number()
                    )]
                },
                |_, _| vec![],
            );
        });

        let backend = MemoryBackend::new();
        let migrator = migrator(registry, backend.clone());
        migrator.migrate(&MigrateOptions::default()).await.unwrap();

        assert_eq!(
            backend.statements(),
            vec!["COMMENT ON TABLE events IS 'step 1';".to_string()]
        );
    }

    #[tokio::test]
    async fn untagged_run_skips_tagged_manifests() {
        let mut registry = users_registry();
        registry
            .register_tagged("users", "audit", |m| {
                m.create(|t| {
                    t.id("id");
                });
            })
            .unwrap();

        let backend = MemoryBackend::new();
        let migrator = migrator(registry, backend.clone());

        migrator.migrate(&MigrateOptions::default()).await.unwrap();
        assert_eq!(backend.applied_steps("users", None), vec![1, 2]);
        assert!(backend.applied_steps("users", Some("audit")).is_empty());

        migrator
            .migrate(&MigrateOptions {
                tag: Some("audit".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(backend.applied_steps("users", Some("audit")), vec![1]);
    }

    #[tokio::test]
    async fn reporter_sees_the_full_lifecycle() {
        let backend = MemoryBackend::new();
        let reporter = RecordingReporter::default();
        let migrator = Migrator::new(users_registry(), backend)
            .with_reporter(Arc::new(reporter.clone()));

        migrator.migrate(&MigrateOptions::default()).await.unwrap();

        let events = reporter.events();
        assert_eq!(events[0], "manifest-started users pending=2");
        assert!(events.contains(&"pending users 1".to_string()));
        assert!(events.contains(&"succeeded users 2".to_string()));
        assert_eq!(events.last().unwrap(), "manifest-completed users applied=2");
    }

    #[test]
    fn mismatched_kind_and_action_is_an_invalid_step() {
        let manifest = Manifest::new(ManifestKey::new("users", None));
        let step = Step::new(
            1,
            StepKind::Create,
            StepAction::Raw(Box::new(|_, _| vec![])),
            None,
        );

        let err = up_statements(&manifest, &step).unwrap_err();
        assert!(matches!(err, MigroError::InvalidStep { number: 1, .. }));
    }

    #[test]
    fn create_steps_roll_back_as_drop_table() {
        let mut manifest = Manifest::new(ManifestKey::new("users", None));
        manifest.create(|t| {
            t.id("id");
        });

        let sql = down_statements(&manifest, &manifest.steps()[0]).unwrap();
        assert_eq!(sql, vec!["DROP TABLE IF EXISTS users;".to_string()]);
    }
}

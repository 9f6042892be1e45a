//! Rollback planner and executor, down direction
//!
//! Selects ledger rows by batch recency, groups them by `(table, tag)`
//! lineage, and undoes each group most-recent-step-first, deleting ledger
//! rows as it goes. A group whose manifest or step can no longer be
//! resolved fails alone; groups already processed stay committed and the
//! rest still run. An ambiguous source set aborts the whole invocation.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::backend::Backend;
use crate::error::{MigroError, MigroResult};
use crate::ledger::{LedgerFilter, LedgerRecord, TagFilter};
use crate::manifest::{Manifest, ManifestKey};
use crate::migrator::{down_statements, run_hooks, Migrator};
use crate::step::{HookPoint, Step};

/// Options for a rollback invocation
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Restrict to one logical table
    pub table: Option<String>,
    /// Restrict to one tag partition; absent means all partitions
    pub tag: Option<String>,
    /// Maximum number of steps to undo per group (highest numbers first)
    pub steps_limit: Option<usize>,
    /// Undo the N most recent batches; absent undoes only the latest one
    pub batches: Option<i32>,
}

/// Result of rolling back one `(table, tag)` group
#[derive(Debug)]
pub struct GroupOutcome {
    pub key: ManifestKey,
    /// Step numbers reverted, in execution (descending) order
    pub reverted: Vec<i32>,
    /// The failure that aborted this group, if any
    pub error: Option<MigroError>,
    pub elapsed_ms: u128,
}

/// Result of a rollback invocation
#[derive(Debug)]
pub struct RollbackReport {
    pub groups: Vec<GroupOutcome>,
    pub elapsed_ms: u128,
}

impl RollbackReport {
    fn empty() -> Self {
        Self {
            groups: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Total steps reverted across all groups
    pub fn reverted_count(&self) -> usize {
        self.groups.iter().map(|g| g.reverted.len()).sum()
    }

    /// Whether every group completed without failure
    pub fn is_success(&self) -> bool {
        self.groups.iter().all(|g| g.error.is_none())
    }

    /// Groups that failed, with their errors
    pub fn failures(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.groups.iter().filter(|g| g.error.is_some())
    }
}

impl<B: Backend> Migrator<B> {
    /// Undo applied steps, selected by batch recency after table/tag
    /// filtering
    pub async fn rollback(&self, opts: &RollbackOptions) -> MigroResult<RollbackReport> {
        let start = Instant::now();

        let mut filter = LedgerFilter {
            table: opts.table.clone(),
            tag: TagFilter::from_option(opts.tag.as_deref()),
            ..Default::default()
        };

        let mut report = RollbackReport::empty();

        let last_batch = match self.backend.max_batch(&filter).await? {
            Some(b) => b,
            None => {
                tracing::warn!("nothing to rollback");
                report.elapsed_ms = start.elapsed().as_millis();
                return Ok(report);
            }
        };

        match opts.batches {
            // values below 1 mean the latest batch; saturate so an extreme
            // count selects everything instead of overflowing
            Some(n) => filter.batch_after = Some(last_batch.saturating_sub(n.max(1))),
            None => filter.batch = Some(last_batch),
        }

        let records = self.backend.records(&filter).await?;
        let groups = group_records(records, opts.steps_limit);

        if groups.is_empty() {
            tracing::warn!("nothing to rollback");
            report.elapsed_ms = start.elapsed().as_millis();
            return Ok(report);
        }

        for (_, (key, rows)) in groups {
            // resolving the wrong manifest would undo the wrong steps, so
            // an ambiguous source set is fatal for the whole invocation
            let manifest = match self.registry.resolve(key.table(), key.tag()) {
                Ok(m) => m,
                Err(e @ MigroError::AmbiguousManifest(_)) => return Err(e),
                Err(e) => {
                    report.groups.push(GroupOutcome {
                        key,
                        reverted: Vec::new(),
                        error: Some(e),
                        elapsed_ms: 0,
                    });
                    continue;
                }
            };

            let outcome = self.process_group(&manifest, rows).await;
            report.groups.push(outcome);
        }

        report.elapsed_ms = start.elapsed().as_millis();
        Ok(report)
    }

    /// Undo one group's rows in descending step order. Failures are
    /// captured in the outcome; rows already reverted stay deleted.
    async fn process_group(&self, manifest: &Manifest, rows: Vec<LedgerRecord>) -> GroupOutcome {
        let key = manifest.key().clone();
        let start = Instant::now();
        let mut outcome = GroupOutcome {
            key: key.clone(),
            reverted: Vec::new(),
            error: None,
            elapsed_ms: 0,
        };

        self.reporter.rollback_group_started(&key, rows.len());

        for record in rows {
            let step = match manifest.step(record.step) {
                Some(step) => step,
                None => {
                    let err = MigroError::StepNotFound {
                        key: key.clone(),
                        number: record.step,
                    };
                    self.reporter.step_failed(&key, record.step, &err);
                    outcome.error = Some(err);
                    break;
                }
            };

            self.reporter.step_started(&key, record.step);
            let step_start = Instant::now();

            match self.run_step_down(manifest, step, record.id).await {
                Ok(()) => {
                    self.reporter
                        .step_succeeded(&key, record.step, step_start.elapsed());
                    outcome.reverted.push(record.step);
                }
                Err(e) => {
                    self.reporter.step_failed(&key, record.step, &e);
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        if outcome.error.is_none() {
            self.reporter
                .rollback_group_completed(&key, outcome.reverted.len(), start.elapsed());
        }
        outcome.elapsed_ms = start.elapsed().as_millis();
        outcome
    }

    /// Execute one step in the down direction: before-down hooks, DDL,
    /// ledger delete, after-down hooks, all inside one unit
    async fn run_step_down(
        &self,
        manifest: &Manifest,
        step: &Step,
        record_id: i64,
    ) -> MigroResult<()> {
        let key = manifest.key().clone();
        let statements = down_statements(manifest, step)?;

        let transactional =
            !step.is_without_transaction() && self.backend.supports_ddl_transactions();
        let mut unit = if transactional {
            self.backend.transaction().await?
        } else {
            self.backend.autocommit().await?
        };

        let result = async {
            run_hooks(step, HookPoint::BeforeDown, &key)?;
            for sql in &statements {
                unit.execute(sql).await?;
            }
            unit.delete_record(record_id).await?;
            run_hooks(step, HookPoint::AfterDown, &key)?;
            Ok::<(), MigroError>(())
        }
        .await;

        match result {
            Ok(()) => unit
                .commit()
                .await
                .map_err(|e| MigroError::step_failure(key, step.number(), transactional, e)),
            Err(e) => {
                drop(unit);
                Err(MigroError::step_failure(key, step.number(), transactional, e))
            }
        }
    }
}

/// Group rows by `(table, tag)` identity, each group descending by step
/// and truncated to the highest `steps_limit` numbers. Groups come back in
/// display-name order so runs are deterministic.
fn group_records(
    records: Vec<LedgerRecord>,
    steps_limit: Option<usize>,
) -> BTreeMap<String, (ManifestKey, Vec<LedgerRecord>)> {
    let mut groups: BTreeMap<String, (ManifestKey, Vec<LedgerRecord>)> = BTreeMap::new();

    for record in records {
        let key = record.key();
        groups
            .entry(key.to_string())
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(record);
    }

    for (_, rows) in groups.values_mut() {
        rows.sort_by(|a, b| b.step.cmp(&a.step));
        if let Some(limit) = steps_limit {
            rows.truncate(limit);
        }
    }

    groups
}

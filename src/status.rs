//! Migration status reporting
//!
//! Joins the full step sequence of every matching manifest against the
//! ledger's applied set, keyed by `(table, tag, step)`. Read-only; no
//! transactional concerns.

use std::collections::HashSet;

use crate::backend::Backend;
use crate::error::MigroResult;
use crate::ledger::{LedgerFilter, TagFilter};
use crate::manifest::ManifestKey;
use crate::migrator::Migrator;

/// Options for a status invocation
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Restrict to one logical table
    pub table: Option<String>,
    /// Restrict to one tag partition; absent shows every partition
    pub tag: Option<String>,
}

/// MIGRATED / NOT MIGRATED classification for one step
#[derive(Debug, Clone)]
pub struct StepStatus {
    pub number: i32,
    pub description: Option<String>,
    pub migrated: bool,
}

/// Status of one manifest's full step sequence
#[derive(Debug)]
pub struct ManifestStatus {
    pub key: ManifestKey,
    pub steps: Vec<StepStatus>,
}

impl ManifestStatus {
    pub fn is_fully_migrated(&self) -> bool {
        self.steps.iter().all(|s| s.migrated)
    }
}

/// Result of a status invocation; untagged manifests come first, each
/// block ordered by display name
#[derive(Debug)]
pub struct StatusReport {
    pub manifests: Vec<ManifestStatus>,
}

impl<B: Backend> Migrator<B> {
    /// Classify every step of every matching manifest as migrated or not
    pub async fn status(&self, opts: &StatusOptions) -> MigroResult<StatusReport> {
        let partition = TagFilter::from_option(opts.tag.as_deref());
        let mut sources = self.registry.select(opts.table.as_deref(), &partition);

        if sources.is_empty() {
            tracing::warn!("nothing to show");
            return Ok(StatusReport {
                manifests: Vec::new(),
            });
        }

        sources.sort_by_key(|s| (s.key().tag().is_some(), s.key().to_string()));

        let records = self
            .backend
            .records(&LedgerFilter {
                table: opts.table.clone(),
                tag: partition,
                ..Default::default()
            })
            .await?;
        let applied: HashSet<(String, Option<String>, i32)> = records
            .into_iter()
            .map(|r| (r.table, r.tag, r.step))
            .collect();

        let mut manifests = Vec::with_capacity(sources.len());
        for source in sources {
            let manifest = source.materialize();
            let key = manifest.key().clone();

            let steps = manifest
                .steps()
                .iter()
                .map(|step| StepStatus {
                    number: step.number(),
                    description: step.description_text().map(str::to_string),
                    migrated: applied.contains(&(
                        key.table().to_string(),
                        key.tag().map(str::to_string),
                        step.number(),
                    )),
                })
                .collect();

            manifests.push(ManifestStatus { key, steps });
        }

        Ok(StatusReport { manifests })
    }
}

//! Progress ledger types
//!
//! The ledger is the engine's single source of truth for what has run: an
//! append-only record of successfully applied steps, one row per
//! `(table, tag, step)`. Rows are written in the same transaction as their
//! step and deleted the same way during rollback, which keeps the applied
//! set of every lineage a dense prefix `{1..K}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestKey;

/// A persisted ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Auto-increment row id
    pub id: i64,
    /// Logical table the step belongs to
    pub table: String,
    /// Lineage tag; `None` is the untagged partition
    pub tag: Option<String>,
    /// 1-based step number within the manifest
    pub step: i32,
    /// Migrate invocation this step was applied in
    pub batch: i32,
    /// When the row was inserted
    pub ran_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Identity of the manifest lineage this row belongs to
    pub fn key(&self) -> ManifestKey {
        ManifestKey::new(self.table.clone(), self.tag.clone())
    }
}

/// A row about to be inserted; `id` and `ran_at` are assigned by the store
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub table: String,
    pub tag: Option<String>,
    pub step: i32,
    pub batch: i32,
}

impl LedgerEntry {
    pub fn new(key: &ManifestKey, step: i32, batch: i32) -> Self {
        Self {
            table: key.table().to_string(),
            tag: key.tag().map(str::to_string),
            step,
            batch,
        }
    }
}

/// Tag filtering mode for ledger queries and source selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TagFilter {
    /// No tag constraint
    #[default]
    Any,
    /// Only the untagged partition (`tag IS NULL`)
    Untagged,
    /// Only the named tag
    Is(String),
}

impl TagFilter {
    /// Build a filter from an optional user-supplied tag, treating an empty
    /// string as absent
    pub fn from_option(tag: Option<&str>) -> Self {
        match tag {
            Some(t) if !t.is_empty() => TagFilter::Is(t.to_string()),
            _ => TagFilter::Any,
        }
    }

    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            TagFilter::Any => true,
            TagFilter::Untagged => tag.is_none(),
            TagFilter::Is(t) => tag == Some(t.as_str()),
        }
    }
}

/// Row selection for ledger queries
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    /// Restrict to one logical table
    pub table: Option<String>,
    /// Restrict by tag partition
    pub tag: TagFilter,
    /// Keep only rows with exactly this batch
    pub batch: Option<i32>,
    /// Keep only rows with a batch strictly greater than this
    pub batch_after: Option<i32>,
}

impl LedgerFilter {
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        if let Some(table) = &self.table {
            if &record.table != table {
                return false;
            }
        }
        if !self.tag.matches(record.tag.as_deref()) {
            return false;
        }
        if let Some(batch) = self.batch {
            if record.batch != batch {
                return false;
            }
        }
        if let Some(after) = self.batch_after {
            if record.batch <= after {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(table: &str, tag: Option<&str>, step: i32, batch: i32) -> LedgerRecord {
        LedgerRecord {
            id: 1,
            table: table.to_string(),
            tag: tag.map(str::to_string),
            step,
            batch,
            ran_at: Utc::now(),
        }
    }

    #[test]
    fn tag_filter_partitions_are_disjoint() {
        assert!(TagFilter::Untagged.matches(None));
        assert!(!TagFilter::Untagged.matches(Some("audit")));
        assert!(TagFilter::Is("audit".into()).matches(Some("audit")));
        assert!(!TagFilter::Is("audit".into()).matches(None));
        assert!(TagFilter::Any.matches(None));
        assert!(TagFilter::Any.matches(Some("audit")));
    }

    #[test]
    fn empty_tag_option_means_no_constraint() {
        assert_eq!(TagFilter::from_option(None), TagFilter::Any);
        assert_eq!(TagFilter::from_option(Some("")), TagFilter::Any);
        assert_eq!(
            TagFilter::from_option(Some("audit")),
            TagFilter::Is("audit".into())
        );
    }

    #[test]
    fn filter_combines_table_tag_and_batch() {
        let filter = LedgerFilter {
            table: Some("users".into()),
            tag: TagFilter::Untagged,
            batch: Some(2),
            batch_after: None,
        };

        assert!(filter.matches(&record("users", None, 1, 2)));
        assert!(!filter.matches(&record("users", Some("audit"), 1, 2)));
        assert!(!filter.matches(&record("users", None, 1, 1)));
        assert!(!filter.matches(&record("posts", None, 1, 2)));
    }

    #[test]
    fn batch_after_is_exclusive() {
        let filter = LedgerFilter {
            batch_after: Some(3),
            ..Default::default()
        };

        assert!(!filter.matches(&record("users", None, 1, 3)));
        assert!(filter.matches(&record("users", None, 1, 4)));
    }
}

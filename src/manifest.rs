//! Migration manifests
//!
//! A manifest is the ordered step sequence for one `(table, tag)` lineage.
//! It is re-derived fresh from its source on every run; only ledger rows
//! persist. Step content must therefore be append-stable: previously
//! numbered steps must never be reordered or removed from a source.

use std::fmt;

use crate::schema::{TableAlteration, TableBlueprint};
use crate::step::{Step, StepAction, StepKind};

/// `(table, tag)` identity of a manifest lineage
///
/// An empty tag normalizes to the untagged partition, which is disjoint
/// from every explicitly tagged one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestKey {
    table: String,
    tag: Option<String>,
}

impl ManifestKey {
    pub fn new(table: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            table: table.into(),
            tag: tag.filter(|t| !t.is_empty()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl fmt::Display for ManifestKey {
    /// Human-readable identity: `table`, or `tag.table` when tagged
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}.{}", tag, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Ordered step sequence bound to one `(table, tag)` identity
pub struct Manifest {
    key: ManifestKey,
    steps: Vec<Step>,
}

impl Manifest {
    pub fn new(key: ManifestKey) -> Self {
        Self {
            key,
            steps: Vec::new(),
        }
    }

    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    pub fn table(&self) -> &str {
        self.key.table()
    }

    pub fn tag(&self) -> Option<&str> {
        self.key.tag()
    }

    /// Steps in append (execution) order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Find a step by its 1-based number
    pub fn step(&self, number: i32) -> Option<&Step> {
        self.steps.iter().find(|s| s.number() == number)
    }

    /// Append a create step; rolls back as DROP TABLE IF EXISTS
    pub fn create(
        &mut self,
        up: impl Fn(&mut TableBlueprint) + Send + Sync + 'static,
    ) -> &mut Step {
        self.push(StepKind::Create, StepAction::Define(Box::new(up)), None)
    }

    /// Append a modify step with explicit up and down alterations
    pub fn modify(
        &mut self,
        up: impl Fn(&mut TableAlteration) + Send + Sync + 'static,
        down: impl Fn(&mut TableAlteration) + Send + Sync + 'static,
    ) -> &mut Step {
        self.push(
            StepKind::Modify,
            StepAction::Change(Box::new(up)),
            Some(StepAction::Change(Box::new(down))),
        )
    }

    /// Append a raw step; both closures produce SQL statements and receive
    /// the manifest and step as explicit context
    pub fn raw(
        &mut self,
        up: impl Fn(&Manifest, &Step) -> Vec<String> + Send + Sync + 'static,
        down: impl Fn(&Manifest, &Step) -> Vec<String> + Send + Sync + 'static,
    ) -> &mut Step {
        self.push(
            StepKind::Raw,
            StepAction::Raw(Box::new(up)),
            Some(StepAction::Raw(Box::new(down))),
        )
    }

    fn push(&mut self, kind: StepKind, up: StepAction, down: Option<StepAction>) -> &mut Step {
        let number = self.steps.len() as i32 + 1;
        self.steps.push(Step::new(number, kind, up, down));
        self.steps.last_mut().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalizes_empty_tag_to_untagged() {
        let untagged = ManifestKey::new("users", None);
        let empty = ManifestKey::new("users", Some(String::new()));
        let tagged = ManifestKey::new("users", Some("audit".into()));

        assert_eq!(untagged, empty);
        assert_ne!(untagged, tagged);
        assert_eq!(untagged.to_string(), "users");
        assert_eq!(tagged.to_string(), "audit.users");
    }

    #[test]
    fn steps_are_numbered_by_append_order() {
        let mut manifest = Manifest::new(ManifestKey::new("users", None));
        manifest.create(|t| {
            t.id("id");
        });
        manifest.modify(
            |t| {
                t.add_column("email", "VARCHAR(255)");
            },
            |t| {
                t.drop_column("email");
            },
        );
        manifest.raw(|_, _| vec![], |_, _| vec![]);

        let numbers: Vec<i32> = manifest.steps().iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(manifest.steps()[0].kind(), StepKind::Create);
        assert_eq!(manifest.steps()[1].kind(), StepKind::Modify);
        assert_eq!(manifest.steps()[2].kind(), StepKind::Raw);
    }

    #[test]
    fn step_lookup_by_number() {
        let mut manifest = Manifest::new(ManifestKey::new("users", None));
        manifest.create(|t| {
            t.id("id");
        });
        manifest
            .raw(|_, _| vec![], |_, _| vec![])
            .description("backfill");

        assert!(manifest.step(1).is_some());
        assert_eq!(manifest.step(2).unwrap().description_text(), Some("backfill"));
        assert!(manifest.step(3).is_none());
    }
}

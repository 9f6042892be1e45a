//! Manifest source registry
//!
//! The registry is the injected list of manifest sources the engine works
//! from. Discovery (filesystem scans, embedding, code registration) is a
//! boundary concern that happens before construction; the core only relies
//! on the `(table, tag) -> steps` resolution contract here.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigroError, MigroResult};
use crate::ledger::TagFilter;
use crate::manifest::{Manifest, ManifestKey};

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").unwrap());

/// Source build callback; appends steps to a freshly created manifest
pub type BuildFn = Box<dyn Fn(&mut Manifest) + Send + Sync>;

/// One registered manifest source
pub struct Source {
    key: ManifestKey,
    build: BuildFn,
}

impl Source {
    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    /// Materialize a fresh manifest from this source. Sources are evaluated
    /// on every run; nothing about a manifest itself is cached or persisted.
    pub fn materialize(&self) -> Manifest {
        let mut manifest = Manifest::new(self.key.clone());
        (self.build)(&mut manifest);
        manifest
    }
}

/// Injected collection of manifest sources
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untagged source for a table
    pub fn register(
        &mut self,
        table: impl Into<String>,
        build: impl Fn(&mut Manifest) + Send + Sync + 'static,
    ) {
        self.sources.push(Source {
            key: ManifestKey::new(table, None),
            build: Box::new(build),
        });
    }

    /// Register a tagged source; the tag must match `^[\w-]+$`
    pub fn register_tagged(
        &mut self,
        table: impl Into<String>,
        tag: impl Into<String>,
        build: impl Fn(&mut Manifest) + Send + Sync + 'static,
    ) -> MigroResult<()> {
        let tag = tag.into();
        if !TAG_PATTERN.is_match(&tag) {
            return Err(MigroError::InvalidTag(tag));
        }
        self.sources.push(Source {
            key: ManifestKey::new(table, Some(tag)),
            build: Box::new(build),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Sources matching an optional table filter and a tag partition
    pub fn select(&self, table: Option<&str>, tag: &TagFilter) -> Vec<&Source> {
        self.sources
            .iter()
            .filter(|s| table.map_or(true, |t| s.key.table() == t))
            .filter(|s| tag.matches(s.key.tag()))
            .collect()
    }

    /// Resolve and materialize the unique manifest for a `(table, tag)`
    /// identity. Zero matches is `ManifestNotFound`; more than one is
    /// `AmbiguousManifest`. Both are re-validated here even though the
    /// surrounding tooling should prevent them, because rollback trusts
    /// this resolution with already-applied history.
    pub fn resolve(&self, table: &str, tag: Option<&str>) -> MigroResult<Manifest> {
        let partition = match tag {
            Some(t) if !t.is_empty() => TagFilter::Is(t.to_string()),
            _ => TagFilter::Untagged,
        };
        let matches = self.select(Some(table), &partition);

        match matches.len() {
            0 => Err(MigroError::ManifestNotFound(ManifestKey::new(
                table,
                tag.map(str::to_string),
            ))),
            1 => Ok(matches[0].materialize()),
            _ => Err(MigroError::AmbiguousManifest(ManifestKey::new(
                table,
                tag.map(str::to_string),
            ))),
        }
    }
}

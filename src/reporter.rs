//! Lifecycle event reporting
//!
//! The engine emits notifications as it works; presentation layers
//! (console renderers, progress bars) consume them. Correctness never
//! depends on a consumer being present, so every method defaults to a
//! no-op.

use std::time::Duration;

use crate::error::MigroError;
use crate::manifest::ManifestKey;

/// Consumer of step and manifest lifecycle events
#[allow(unused_variables)]
pub trait Reporter: Send + Sync {
    /// A manifest is about to be processed in the up direction
    fn manifest_started(&self, key: &ManifestKey, pending: usize, total: usize) {}

    /// A step below the pending window; reported, never re-run
    fn step_already_applied(&self, key: &ManifestKey, number: i32) {}

    /// A step inside the pending window, waiting to run
    fn step_pending(&self, key: &ManifestKey, number: i32) {}

    /// A step cut off by the steps limit; informational only
    fn step_outside_limit(&self, key: &ManifestKey, number: i32) {}

    /// A step's execution began (either direction)
    fn step_started(&self, key: &ManifestKey, number: i32) {}

    /// A step completed successfully
    fn step_succeeded(&self, key: &ManifestKey, number: i32, elapsed: Duration) {}

    /// A step failed; the rest of its manifest or group is aborted
    fn step_failed(&self, key: &ManifestKey, number: i32, error: &MigroError) {}

    /// A manifest finished the up direction
    fn manifest_completed(&self, key: &ManifestKey, applied: usize, elapsed: Duration) {}

    /// A rollback group is about to be processed
    fn rollback_group_started(&self, key: &ManifestKey, steps: usize) {}

    /// A rollback group finished
    fn rollback_group_completed(&self, key: &ManifestKey, reverted: usize, elapsed: Duration) {}
}

/// Reporter that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Reporter that renders every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceReporter;

impl Reporter for TraceReporter {
    fn manifest_started(&self, key: &ManifestKey, pending: usize, total: usize) {
        tracing::info!(manifest = %key, pending, total, "migrating");
    }

    fn step_already_applied(&self, key: &ManifestKey, number: i32) {
        tracing::debug!(manifest = %key, step = number, "already applied");
    }

    fn step_pending(&self, key: &ManifestKey, number: i32) {
        tracing::debug!(manifest = %key, step = number, "pending");
    }

    fn step_outside_limit(&self, key: &ManifestKey, number: i32) {
        tracing::debug!(manifest = %key, step = number, "outside the limits");
    }

    fn step_started(&self, key: &ManifestKey, number: i32) {
        tracing::debug!(manifest = %key, step = number, "processing");
    }

    fn step_succeeded(&self, key: &ManifestKey, number: i32, elapsed: Duration) {
        tracing::info!(
            manifest = %key,
            step = number,
            elapsed_ms = elapsed.as_millis() as u64,
            "step applied"
        );
    }

    fn step_failed(&self, key: &ManifestKey, number: i32, error: &MigroError) {
        tracing::error!(manifest = %key, step = number, %error, "step failed");
    }

    fn manifest_completed(&self, key: &ManifestKey, applied: usize, elapsed: Duration) {
        tracing::info!(
            manifest = %key,
            applied,
            elapsed_ms = elapsed.as_millis() as u64,
            "migrated"
        );
    }

    fn rollback_group_started(&self, key: &ManifestKey, steps: usize) {
        tracing::info!(manifest = %key, steps, "rolling back");
    }

    fn rollback_group_completed(&self, key: &ManifestKey, reverted: usize, elapsed: Duration) {
        tracing::info!(
            manifest = %key,
            reverted,
            elapsed_ms = elapsed.as_millis() as u64,
            "rolled back"
        );
    }
}

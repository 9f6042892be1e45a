//! Error types for the migration engine
//!
//! Every failure mode the engine can surface is a variant here. Step
//! failures distinguish whether the step's transaction rolled back cleanly
//! or whether the backend ran without one and the ledger may need manual
//! reconciliation.

use thiserror::Error;

use crate::manifest::ManifestKey;
use crate::step::HookPoint;

/// Result type alias for migration operations
pub type MigroResult<T> = Result<T, MigroError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigroError {
    /// No source is registered for a `(table, tag)` identity
    #[error("no manifest source registered for \"{0}\"")]
    ManifestNotFound(ManifestKey),

    /// More than one source resolves to the same `(table, tag)` identity
    #[error("multiple manifest sources registered for \"{0}\"")]
    AmbiguousManifest(ManifestKey),

    /// A step's kind and its actions do not line up (misauthored manifest)
    #[error("invalid step {number} in \"{key}\": {reason}")]
    InvalidStep {
        key: ManifestKey,
        number: i32,
        reason: String,
    },

    /// A ledger row references a step the current manifest no longer has
    #[error("step {number} is recorded in the ledger but missing from manifest \"{key}\"")]
    StepNotFound { key: ManifestKey, number: i32 },

    /// Tag does not match the `^[\w-]+$` naming rule
    #[error("invalid tag name \"{0}\"")]
    InvalidTag(String),

    /// A lifecycle hook returned an error
    #[error("{point} hook failed on step {number} of \"{key}\": {source}")]
    Hook {
        key: ManifestKey,
        number: i32,
        point: HookPoint,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Step failed inside a transaction; DDL and ledger insert rolled back together
    #[error("step {number} of \"{key}\" failed, changes rolled back: {source}")]
    StepAborted {
        key: ManifestKey,
        number: i32,
        #[source]
        source: Box<MigroError>,
    },

    /// Step failed without a wrapping transaction; the ledger may be inconsistent
    #[error(
        "step {number} of \"{key}\" failed outside a transaction, \
         manual reconciliation may be required: {source}"
    )]
    StepUnreconciled {
        key: ManifestKey,
        number: i32,
        #[source]
        source: Box<MigroError>,
    },

    /// Progress ledger read or write failed
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Underlying database error
    #[error("database error: {0}")]
    Database(String),
}

impl MigroError {
    /// Wrap a step-level failure according to whether a transaction was active.
    pub(crate) fn step_failure(
        key: ManifestKey,
        number: i32,
        transactional: bool,
        source: MigroError,
    ) -> Self {
        let source = Box::new(source);
        if transactional {
            MigroError::StepAborted {
                key,
                number,
                source,
            }
        } else {
            MigroError::StepUnreconciled {
                key,
                number,
                source,
            }
        }
    }
}

impl From<sqlx::Error> for MigroError {
    fn from(err: sqlx::Error) -> Self {
        MigroError::Database(err.to_string())
    }
}

//! Error taxonomy for the export pipeline.
//!
//! Backend failures are fatal and abort the whole run: a partial table is
//! worse than no table for root-cause labeling. Unparseable sample values are
//! not errors at all; the normalizer substitutes the missing sentinel locally.

use thiserror::Error;

/// Process exit code for a failed backend query or invalid configuration.
pub const EXIT_FAILURE: i32 = 1;

/// Process exit code when the merged table has zero rows.
pub const EXIT_EMPTY: i32 = 2;

/// Errors surfaced by the export pipeline.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The metrics backend reported a non-success status or was unreachable.
    /// Carries the originating expression so the failing (entity, metric)
    /// query can be identified among the dozens issued per run.
    #[error("backend query failed\nquery:\n{query}\nerror: {message}")]
    Backend { query: String, message: String },

    /// The fully merged, schema-enforced table has no rows.
    #[error("no data returned; check metric names, labels, or the time window")]
    EmptyTable,
}

impl ExportError {
    /// Build a backend error from an expression and any displayable cause.
    pub fn backend(query: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            query: query.into(),
            message: message.to_string(),
        }
    }

    /// Exit code the process should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Backend { .. } => EXIT_FAILURE,
            Self::EmptyTable => EXIT_EMPTY,
        }
    }
}

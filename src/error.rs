// src/error.rs
//! Error taxonomy of the data layer.
//!
//! Only [`DataError::NoDataAvailable`] is meant to reach calculator callers as a
//! hard failure. Fetch errors stay inside `DataService`, rule failures become
//! report entries and job failures end up in `UpdateJob::last_error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    /// Live fetch failed and neither a cached nor a fallback payload exists.
    #[error("no data available for source `{0}`")]
    NoDataAvailable(String),

    #[error("unknown data source `{0}`")]
    UnknownSource(String),

    /// A typed projection did not match the payload shape.
    #[error("payload for `{source_id}` has unexpected shape: {reason}")]
    MalformedPayload { source_id: String, reason: String },

    #[error("job `{0}` not found")]
    JobNotFound(String),

    #[error("ledger persistence failed: {0}")]
    Persistence(String),
}

impl DataError {
    pub fn malformed(source_id: &str, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for the one error class that must propagate to calculators.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoDataAvailable(_))
    }
}

pub type DataResult<T> = Result<T, DataError>;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures from the remote document store.
///
/// Transient faults freeze the affected category's count at its last
/// known value; they never propagate across categories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
}

/// Watermark invariant violations.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// A watermark may only move forward in time.
    #[error("watermark for '{category}' cannot move backward ({attempted} < {current})")]
    MovedBackward {
        category: String,
        attempted: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A recurrence pattern the calculator cannot work with. The owning
/// template is skipped for the tick but stays active.
#[derive(Debug, Error)]
pub enum RecurrenceError {
    #[error("malformed recurrence pattern: {0}")]
    Malformed(String),

    #[error("computed occurrence is unrepresentable: {0}")]
    OutOfRange(String),
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::models::Record;

mod memory;

pub use memory::MemoryStore;

/// A full result set for a query. The store redelivers the complete
/// current set on every matching change, never a diff.
pub type Snapshot = Vec<Record>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub collection: String,
    pub id: String,
}

impl RecordRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Result of a conditional write. `Conflict` means another writer got
/// there first; callers treat it as success-no-op, it is the expected
/// idempotency path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Conflict,
}

/// The queries this core issues: a collection, an optional status
/// filter, an optional "due before" bound on an instant field, and an
/// optional recurring flag.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub collection: String,
    pub statuses: Vec<String>,
    pub due_field: Option<String>,
    pub due_before: Option<DateTime<Utc>>,
    pub is_recurring: Option<bool>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            ..Self::default()
        }
    }

    pub fn with_statuses<S: Into<String>>(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn due_before(mut self, field: impl Into<String>, instant: DateTime<Utc>) -> Self {
        self.due_field = Some(field.into());
        self.due_before = Some(instant);
        self
    }

    pub fn recurring(mut self, flag: bool) -> Self {
        self.is_recurring = Some(flag);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.statuses.is_empty() {
            match record.status() {
                Some(status) if self.statuses.iter().any(|s| s == status) => {}
                _ => return false,
            }
        }

        if let (Some(field), Some(bound)) = (&self.due_field, self.due_before) {
            match record.instant(field) {
                Some(due) if due <= bound => {}
                _ => return false,
            }
        }

        if let Some(flag) = self.is_recurring {
            let recorded = record
                .fields
                .get("isRecurring")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if recorded != flag {
                return false;
            }
        }

        true
    }
}

/// The remote document store, treated as an external collaborator.
///
/// Subscriptions are explicit snapshot channels: the receiver gets the
/// full current result set on every matching change, and channel
/// closure models subscription loss.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn subscribe(&self, query: Query) -> mpsc::Receiver<Snapshot>;

    async fn query_once(&self, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Create a record with a store-assigned id.
    async fn create(&self, collection: &str, fields: Value) -> Result<String, StoreError>;

    /// Shallow-merge `fields` into an existing record.
    async fn write(&self, record: &RecordRef, fields: Value) -> Result<(), StoreError>;

    /// Merge `fields` only if the record's current status equals
    /// `expected_status`; first writer wins.
    async fn conditional_write(
        &self,
        record: &RecordRef,
        expected_status: &str,
        fields: Value,
    ) -> Result<WriteOutcome, StoreError>;
}

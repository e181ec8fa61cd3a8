use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DocumentStore, Query, RecordRef, Snapshot, WriteOutcome};
use crate::error::StoreError;
use crate::models::Record;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

struct Subscriber {
    query: Query,
    tx: mpsc::Sender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    subscribers: Vec<Subscriber>,
    offline: bool,
}

/// In-process [`DocumentStore`] with live snapshot re-emission. Every
/// mutation redelivers the full current result set to each subscriber
/// whose query touches the mutated collection, mirroring the remote
/// store's contract. Used by tests and local development.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a record wholesale, then notify subscribers.
    pub fn insert(&self, collection: &str, id: &str, fields: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        Self::notify(&mut inner, collection);
    }

    /// Current fields of a record, for test assertions.
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner.collections.get(collection)?.get(id).cloned()
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        let inner = self.inner.lock().unwrap();
        Self::collection_records(&inner, collection)
    }

    /// Simulate a transient store outage: `query_once` fails until
    /// restored.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    /// Simulate subscription loss for one collection by closing its
    /// snapshot channels. Subscribers on other collections are
    /// untouched.
    pub fn disconnect(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .retain(|sub| sub.query.collection != collection);
    }

    fn collection_records(inner: &Inner, collection: &str) -> Vec<Record> {
        inner
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn matching_records(inner: &Inner, query: &Query) -> Vec<Record> {
        Self::collection_records(inner, &query.collection)
            .into_iter()
            .filter(|record| query.matches(record))
            .collect()
    }

    fn notify(inner: &mut Inner, collection: &str) {
        let mut snapshots: Vec<(usize, Snapshot)> = Vec::new();
        for (idx, sub) in inner.subscribers.iter().enumerate() {
            if sub.query.collection == collection {
                snapshots.push((idx, Self::matching_records(inner, &sub.query)));
            }
        }

        let mut closed: Vec<usize> = Vec::new();
        for (idx, snapshot) in snapshots {
            let sub = &inner.subscribers[idx];
            match sub.tx.try_send(snapshot) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(idx),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer; it will catch up on the next change.
                    warn!("dropping snapshot for saturated subscriber on '{collection}'");
                }
            }
        }

        for idx in closed.into_iter().rev() {
            inner.subscribers.remove(idx);
        }
    }

    fn merge_fields(target: &mut Value, fields: Value) {
        match (target, fields) {
            (Value::Object(stored), Value::Object(updates)) => {
                for (key, value) in updates {
                    stored.insert(key, value);
                }
            }
            (stored, fields) => *stored = fields,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn subscribe(&self, query: Query) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().unwrap();

        // Initial snapshot so a new subscriber starts from current state.
        let initial = Self::matching_records(&inner, &query);
        let _ = tx.try_send(initial);

        inner.subscribers.push(Subscriber { query, tx });
        rx
    }

    async fn query_once(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(Self::matching_records(&inner, query))
    }

    async fn create(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        Self::notify(&mut inner, collection);
        Ok(id)
    }

    async fn write(&self, record: &RecordRef, fields: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }

        let stored = inner
            .collections
            .get_mut(&record.collection)
            .and_then(|records| records.get_mut(&record.id))
            .ok_or_else(|| StoreError::NotFound {
                collection: record.collection.clone(),
                id: record.id.clone(),
            })?;

        Self::merge_fields(stored, fields);
        Self::notify(&mut inner, &record.collection);
        Ok(())
    }

    async fn conditional_write(
        &self,
        record: &RecordRef,
        expected_status: &str,
        fields: Value,
    ) -> Result<WriteOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }

        let stored = inner
            .collections
            .get_mut(&record.collection)
            .and_then(|records| records.get_mut(&record.id))
            .ok_or_else(|| StoreError::NotFound {
                collection: record.collection.clone(),
                id: record.id.clone(),
            })?;

        let current_status = stored.get("status").and_then(Value::as_str);
        if current_status != Some(expected_status) {
            return Ok(WriteOutcome::Conflict);
        }

        Self::merge_fields(stored, fields);
        Self::notify(&mut inner, &record.collection);
        Ok(WriteOutcome::Applied)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::Category;
use crate::store::{DocumentStore, Query, RecordRef, Snapshot};
use crate::watermark::WatermarkStore;

use super::counter::{count_new, CounterState};

pub const CONVERSATIONS_COLLECTION: &str = "conversations";

#[derive(Default)]
struct Shared {
    counts: Mutex<HashMap<String, CounterState>>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
    unread: Mutex<u64>,
}

/// Live badge counts for every configured category plus the unread
/// conversation sum.
///
/// Each category runs its own subscription task; a failure or closed
/// stream freezes that category's count at its last successful value
/// and never disturbs the others. Counts only return to zero when the
/// operator marks a category as seen.
pub struct NotificationAggregator {
    store: Arc<dyn DocumentStore>,
    watermarks: WatermarkStore,
    clock: Arc<dyn Clock>,
    categories: HashMap<String, Category>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationAggregator {
    /// Subscribe to every category and the conversations collection and
    /// start recomputing counts on each emission.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        watermarks: WatermarkStore,
        clock: Arc<dyn Clock>,
        categories: Vec<Category>,
    ) -> Self {
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();
        let mut workers = Vec::with_capacity(categories.len() + 1);

        for category in &categories {
            workers.push(tokio::spawn(category_loop(
                category.clone(),
                store.clone(),
                watermarks.clone(),
                clock.clone(),
                shared.clone(),
                cancel.clone(),
            )));
        }

        workers.push(tokio::spawn(conversations_loop(
            store.clone(),
            shared.clone(),
            cancel.clone(),
        )));

        info!(
            "notification aggregator watching {} categories",
            categories.len()
        );

        Self {
            store,
            watermarks,
            clock,
            categories: categories
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            shared,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Most recent successful count per category. Categories with no
    /// emission yet are absent.
    pub async fn counts(&self) -> HashMap<String, u64> {
        self.shared
            .counts
            .lock()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.count))
            .collect()
    }

    /// Sum of `unreadCount` over all live conversation records. Tracks
    /// the store's own read/unread field, not a watermark.
    pub async fn unread_conversations(&self) -> u64 {
        *self.shared.unread.lock().await
    }

    /// Advance the category's watermark to now (durably, before this
    /// returns) and recompute immediately against the cached snapshot so
    /// the badge drops to zero without waiting for the next emission.
    pub async fn mark_seen(&self, category_id: &str) -> Result<()> {
        let category = self
            .categories
            .get(category_id)
            .ok_or_else(|| anyhow!("unknown category '{category_id}'"))?;

        let now = self.clock.now();
        self.watermarks
            .advance(category_id, now)
            .await
            .with_context(|| format!("failed to mark '{category_id}' as seen"))?;

        let snapshot = self
            .shared
            .snapshots
            .lock()
            .await
            .get(category_id)
            .cloned();

        if let Some(snapshot) = snapshot {
            let count = count_new(&snapshot, category, now);
            self.shared.counts.lock().await.insert(
                category_id.to_string(),
                CounterState {
                    count,
                    computed_at: now,
                },
            );
        }

        Ok(())
    }

    /// Reset a conversation's unread counter in the store. The local sum
    /// is not faked to zero; it catches up on the next emission so the
    /// store stays the source of truth.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        self.store
            .write(
                &RecordRef::new(CONVERSATIONS_COLLECTION, conversation_id),
                json!({ "unreadCount": 0 }),
            )
            .await
            .with_context(|| format!("failed to mark conversation '{conversation_id}' read"))
    }

    /// Tear down every subscription task. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            handle.await.context("aggregator worker failed to join")?;
        }
        Ok(())
    }
}

async fn category_loop(
    category: Category,
    store: Arc<dyn DocumentStore>,
    watermarks: WatermarkStore,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let query =
        Query::collection(&category.collection).with_statuses(category.statuses.clone());
    let mut rx = store.subscribe(query);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(snapshot) => {
                    let watermark = match watermarks.get(&category.id).await {
                        Ok(watermark) => watermark,
                        Err(err) => {
                            // Hold the last successful count rather than
                            // erroring or resetting to zero.
                            error!("watermark read failed for '{}': {err:#}", category.id);
                            continue;
                        }
                    };

                    let count = count_new(&snapshot, &category, watermark);
                    shared
                        .snapshots
                        .lock()
                        .await
                        .insert(category.id.clone(), snapshot);
                    shared.counts.lock().await.insert(
                        category.id.clone(),
                        CounterState {
                            count,
                            computed_at: clock.now(),
                        },
                    );
                }
                None => {
                    warn!(
                        "subscription for '{}' closed; badge frozen at last value",
                        category.id
                    );
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }
}

async fn conversations_loop(
    store: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut rx = store.subscribe(Query::collection(CONVERSATIONS_COLLECTION));

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(snapshot) => {
                    let sum: u64 = snapshot.iter().map(|record| record.unread_count()).sum();
                    *shared.unread.lock().await = sum;
                }
                None => {
                    warn!("conversation subscription closed; unread sum frozen");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }
}

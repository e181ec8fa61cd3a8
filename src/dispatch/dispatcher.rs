use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::{JobStatus, ScheduledJob};
use crate::store::{DocumentStore, Query, RecordRef, WriteOutcome};

use super::recurrence::next_occurrence;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    pub jobs_collection: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            jobs_collection: "scheduled_messages".into(),
        }
    }
}

/// Scoped single-flight guard: acquired with a compare-exchange, always
/// released on drop so a tick that panics partway through cannot wedge
/// future ticks.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl TickGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Polls the store for due one-off and recurring broadcast jobs.
///
/// One-offs transition `scheduled -> sent` through a conditional write;
/// losing that race is the expected idempotency path and is skipped
/// silently. Recurring templates spawn a `sent` instance and advance
/// their `nextDueAt` from the previous due instant, never from the
/// dispatcher's clock, so a missed tick drifts at most one period.
/// Each service instance owns its ticker and cancellation token.
#[derive(Clone)]
pub struct ScheduledDispatcher {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    ticker: Arc<Mutex<Option<(JoinHandle<()>, CancellationToken)>>>,
    in_flight: Arc<AtomicBool>,
}

impl ScheduledDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            ticker: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the polling loop. Replaces any previous loop.
    pub async fn start(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some((handle, cancel)) = ticker_guard.take() {
            cancel.cancel();
            handle.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let dispatcher = self.clone();
        let tick_interval = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => dispatcher.tick().await,
                    _ = token.cancelled() => {
                        info!("dispatcher loop shutting down");
                        break;
                    }
                }
            }
        });

        *ticker_guard = Some((handle, cancel));
        info!(
            "dispatcher started (period {:?}, collection '{}')",
            self.config.tick_interval, self.config.jobs_collection
        );
    }

    /// Stop the polling loop and wait for it to wind down. In-flight
    /// store calls are abandoned with the task; the single-flight flag
    /// is released by the tick guard's drop.
    pub async fn stop(&self) {
        let taken = self.ticker.lock().await.take();
        if let Some((handle, cancel)) = taken {
            cancel.cancel();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!("dispatcher loop failed to join: {err}");
                }
            }
        }
    }

    /// Run one dispatch pass. Skipped entirely if a previous pass is
    /// still in flight.
    pub async fn tick(&self) {
        let Some(_guard) = TickGuard::acquire(&self.in_flight) else {
            debug!("previous dispatch tick still running; skipping");
            return;
        };

        let now = self.clock.now();

        if let Err(err) = self.fire_due_one_offs(now).await {
            error!("one-off dispatch pass failed: {err:#}");
        }
        if let Err(err) = self.fire_due_recurring(now).await {
            error!("recurring dispatch pass failed: {err:#}");
        }
    }

    /// Step 1: one-off jobs with `status = scheduled` and `dueAt <= now`.
    async fn fire_due_one_offs(&self, now: DateTime<Utc>) -> Result<()> {
        let query = Query::collection(&self.config.jobs_collection)
            .with_statuses([JobStatus::Scheduled.as_str()])
            .due_before("dueAt", now)
            .recurring(false);

        let due = self.store.query_once(&query).await?;

        for record in due {
            let record_ref = RecordRef::new(&self.config.jobs_collection, &record.id);
            let outcome = self
                .store
                .conditional_write(
                    &record_ref,
                    JobStatus::Scheduled.as_str(),
                    json!({
                        "status": JobStatus::Sent.as_str(),
                        "sentAt": now.to_rfc3339(),
                    }),
                )
                .await;

            match outcome {
                Ok(WriteOutcome::Applied) => {
                    info!("sent scheduled message '{}'", record.id);
                }
                Ok(WriteOutcome::Conflict) => {
                    // Another tick won the race; nothing to do.
                    debug!("scheduled message '{}' already sent", record.id);
                }
                Err(err) => {
                    error!("failed to send scheduled message '{}': {err}", record.id);
                }
            }
        }

        Ok(())
    }

    /// Step 2: recurring templates with `status = active` and
    /// `nextDueAt <= now`. Each template is processed independently; a
    /// failure skips only that template, which stays active for the
    /// next tick.
    async fn fire_due_recurring(&self, now: DateTime<Utc>) -> Result<()> {
        let query = Query::collection(&self.config.jobs_collection)
            .with_statuses([JobStatus::Active.as_str()])
            .due_before("nextDueAt", now)
            .recurring(true);

        let due = self.store.query_once(&query).await?;

        for record in due {
            let template = match ScheduledJob::from_record(&record) {
                Ok(template) => template,
                Err(err) => {
                    error!("skipping unreadable template '{}': {err:#}", record.id);
                    continue;
                }
            };

            if let Err(err) = self.fire_template(&template, now).await {
                error!("template '{}' failed this tick: {err:#}", template.id);
            }
        }

        Ok(())
    }

    async fn fire_template(&self, template: &ScheduledJob, now: DateTime<Utc>) -> Result<()> {
        let Some(pattern) = &template.recurrence else {
            warn!("template '{}' has no recurrence pattern", template.id);
            return Ok(());
        };
        let Some(previous_due) = template.next_due_at else {
            warn!("template '{}' has no nextDueAt", template.id);
            return Ok(());
        };

        // Advance from the previous due instant, not `now`, so a missed
        // tick does not compound drift beyond one period.
        let next_due = next_occurrence(pattern, previous_due)?;

        let mut instance = template.payload.clone();
        instance.insert("status".into(), json!(JobStatus::Sent.as_str()));
        instance.insert("isRecurring".into(), json!(false));
        instance.insert("parentJobId".into(), json!(template.id));
        instance.insert("sentAt".into(), json!(now.to_rfc3339()));

        let instance_id = self
            .store
            .create(&self.config.jobs_collection, Value::Object(instance))
            .await?;

        self.store
            .write(
                &RecordRef::new(&self.config.jobs_collection, &template.id),
                json!({ "nextDueAt": next_due.to_rfc3339() }),
            )
            .await?;

        info!(
            "recurring template '{}' spawned instance '{}', next due {}",
            template.id, instance_id, next_due
        );
        Ok(())
    }
}

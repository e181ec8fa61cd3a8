//! Background core for an operator console: live unseen-item badge
//! counts over a remote document store, and a polling dispatcher for
//! one-off and recurring broadcast jobs. The UI layer reads
//! [`NotificationAggregator::counts`] / `unread_conversations` and calls
//! `mark_seen` / `mark_conversation_read` on user action; the
//! [`ScheduledDispatcher`] runs on its own timer.

mod clock;
mod db;
mod dispatch;
mod error;
mod models;
mod notify;
mod store;
mod watermark;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use dispatch::{next_occurrence, DispatcherConfig, ScheduledDispatcher};
pub use error::{RecurrenceError, StoreError, WatermarkError};
pub use models::{
    default_categories, Category, JobStatus, Record, RecurrenceKind, RecurrencePattern,
    ScheduledJob, TimeOfDay,
};
pub use notify::{count_new, CounterState, NotificationAggregator, CONVERSATIONS_COLLECTION};
pub use store::{DocumentStore, MemoryStore, Query, RecordRef, Snapshot, WriteOutcome};
pub use watermark::WatermarkStore;

mod aggregator;
mod counter;

pub use aggregator::{NotificationAggregator, CONVERSATIONS_COLLECTION};
pub use counter::{count_new, CounterState};

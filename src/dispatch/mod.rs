mod dispatcher;
mod recurrence;

pub use dispatcher::{DispatcherConfig, ScheduledDispatcher};
pub use recurrence::next_occurrence;

mod category;
mod job;
mod record;

pub use category::{default_categories, Category};
pub use job::{JobStatus, RecurrenceKind, RecurrencePattern, ScheduledJob, TimeOfDay};
pub use record::Record;

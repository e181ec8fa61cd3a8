use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Record;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Scheduled,
    Sent,
    Active,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Sent => "sent",
            JobStatus::Active => "active",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

/// Wall-clock time of day for a recurrence, in the store's single
/// reference zone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeOfDay {
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

fn default_day_of_month() -> u32 {
    1
}

/// Declarative recurrence rule attached to a template job. Immutable
/// once attached; missing optional fields take their documented
/// defaults rather than failing the parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePattern {
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    #[serde(default)]
    pub time_of_day: TimeOfDay,
    /// Weekday numbers for weekly patterns, 0 = Sunday .. 6 = Saturday.
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    /// Calendar day for monthly patterns; clamped to the month's length.
    #[serde(default = "default_day_of_month")]
    pub day_of_month: u32,
}

/// A one-off or recurring broadcast job. Recurring templates keep
/// `status = active` forever; only one-offs and spawned instances ever
/// become `sent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    #[serde(skip)]
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, rename = "recurrencePattern")]
    pub recurrence: Option<RecurrencePattern>,
    #[serde(default)]
    pub next_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_job_id: Option<String>,
    /// Everything else on the document (title, body, audience, ...) is
    /// carried opaquely so spawned instances keep the full payload.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ScheduledJob {
    pub fn from_record(record: &Record) -> Result<Self> {
        let mut job: ScheduledJob = serde_json::from_value(record.fields.clone())
            .with_context(|| format!("malformed scheduled job '{}'", record.id))?;
        job.id = record.id.clone();
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_one_off_job() {
        let record = Record::new(
            "job-1",
            json!({
                "status": "scheduled",
                "dueAt": "2024-01-01T09:00:00Z",
                "title": "maintenance window",
            }),
        );

        let job = ScheduledJob::from_record(&record).unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(!job.is_recurring);
        assert!(job.due_at.is_some());
        assert_eq!(job.payload.get("title").unwrap(), &json!("maintenance window"));
    }

    #[test]
    fn parses_a_recurring_template_with_pattern_defaults() {
        let record = Record::new(
            "tmpl-1",
            json!({
                "status": "active",
                "isRecurring": true,
                "nextDueAt": "2024-01-01T09:00:00Z",
                "recurrencePattern": { "type": "monthly" },
            }),
        );

        let job = ScheduledJob::from_record(&record).unwrap();
        assert!(job.is_recurring);
        let pattern = job.recurrence.unwrap();
        assert_eq!(pattern.kind, RecurrenceKind::Monthly);
        assert_eq!(pattern.day_of_month, 1);
        assert_eq!(pattern.time_of_day, TimeOfDay { hour: 0, minute: 0 });
        assert!(pattern.days_of_week.is_empty());
    }

    #[test]
    fn unknown_status_fails_the_parse() {
        let record = Record::new("job-2", json!({ "status": "paused" }));
        assert!(ScheduledJob::from_record(&record).is_err());
    }
}

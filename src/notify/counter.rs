use chrono::{DateTime, Utc};

use crate::models::{Category, Record};

/// A category's derived badge state. Disposable: fully reconstructible
/// from the live result set and the watermark.
#[derive(Debug, Clone, Copy)]
pub struct CounterState {
    pub count: u64,
    pub computed_at: DateTime<Utc>,
}

/// Count the records that pass the category's status predicate and were
/// created strictly after the watermark. A record with no extractable
/// creation time is not "new" — new is only meaningful relative to a
/// timestamp.
pub fn count_new(records: &[Record], category: &Category, watermark: DateTime<Utc>) -> u64 {
    records
        .iter()
        .filter(|record| category.matches(record))
        .filter(|record| match record.instant(&category.time_field) {
            Some(created) => created > watermark,
            None => false,
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn ticket(id: &str, status: &str, created: DateTime<Utc>) -> Record {
        Record::new(
            id,
            json!({ "status": status, "createdAt": created.to_rfc3339() }),
        )
    }

    #[test]
    fn counts_records_newer_than_the_watermark() {
        let category =
            Category::new("tickets", "tickets", "createdAt").with_statuses(["open", "new", "pending"]);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let records = vec![
            ticket("a", "open", t0 - Duration::seconds(10)),
            ticket("b", "open", t0 + Duration::seconds(5)),
            ticket("c", "open", t0 + Duration::seconds(20)),
        ];

        assert_eq!(count_new(&records, &category, t0), 2);
    }

    #[test]
    fn status_predicate_excludes_records() {
        let category = Category::new("tickets", "tickets", "createdAt").with_statuses(["open"]);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let records = vec![
            ticket("a", "open", t0 + Duration::seconds(5)),
            ticket("b", "closed", t0 + Duration::seconds(5)),
        ];

        assert_eq!(count_new(&records, &category, t0), 1);
    }

    #[test]
    fn record_at_the_watermark_is_not_new() {
        let category = Category::new("tickets", "tickets", "createdAt");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let records = vec![ticket("a", "open", t0)];
        assert_eq!(count_new(&records, &category, t0), 0);
    }

    #[test]
    fn missing_creation_time_is_not_new() {
        let category = Category::new("tickets", "tickets", "createdAt");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let records = vec![
            Record::new("a", json!({ "status": "open" })),
            Record::new("b", json!({ "status": "open", "createdAt": "not a date" })),
            ticket("c", "open", t0 + Duration::seconds(1)),
        ];

        assert_eq!(count_new(&records, &category, t0), 1);
    }

    #[test]
    fn empty_result_set_counts_zero() {
        let category = Category::new("tickets", "tickets", "createdAt");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(count_new(&[], &category, t0), 0);
    }
}

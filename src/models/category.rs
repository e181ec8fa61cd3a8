use super::Record;

/// Static configuration for one unseen-item badge: which collection to
/// watch, which statuses count, and the canonical creation-time field.
/// Created at process start and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub collection: String,
    /// Accepted status values; empty means any status passes.
    pub statuses: Vec<String>,
    /// Field holding the record's creation instant.
    pub time_field: String,
}

impl Category {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        time_field: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            statuses: Vec::new(),
            time_field: time_field.into(),
        }
    }

    pub fn with_statuses<S: Into<String>>(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// The category's status predicate.
    pub fn matches(&self, record: &Record) -> bool {
        if self.statuses.is_empty() {
            return true;
        }
        match record.status() {
            Some(status) => self.statuses.iter().any(|s| s == status),
            None => false,
        }
    }
}

/// The operator-console badge set: one category per kind of record the
/// console surfaces as "new" or "pending".
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new("tickets", "tickets", "createdAt").with_statuses(["open", "new", "pending"]),
        Category::new("users", "users", "createdAt"),
        Category::new("feedback", "feedback", "createdAt"),
        Category::new("applications", "applications", "createdAt").with_statuses(["pending"]),
        Category::new("payouts", "payouts", "createdAt").with_statuses(["pending"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_status_list_matches_everything() {
        let category = Category::new("users", "users", "createdAt");
        let rec = Record::new("u1", json!({ "status": "whatever" }));
        assert!(category.matches(&rec));

        let rec = Record::new("u2", json!({}));
        assert!(category.matches(&rec));
    }

    #[test]
    fn status_filter_requires_a_listed_status() {
        let category =
            Category::new("tickets", "tickets", "createdAt").with_statuses(["open", "new"]);

        assert!(category.matches(&Record::new("t1", json!({ "status": "open" }))));
        assert!(!category.matches(&Record::new("t2", json!({ "status": "closed" }))));
        assert!(!category.matches(&Record::new("t3", json!({}))));
    }
}

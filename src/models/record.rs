use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// A loosely-typed document from the remote store: an id plus a JSON
/// field map. Accessors default conservatively so a single malformed
/// record never fails a recomputation.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub fields: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Read an instant-valued field. Accepts RFC 3339 strings and integer
    /// epoch milliseconds (document stores commonly stamp either).
    /// Anything else yields `None`, which counting treats as "not new".
    pub fn instant(&self, field: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(field)? {
            Value::String(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => {
                let millis = n.as_i64()?;
                Utc.timestamp_millis_opt(millis).single()
            }
            _ => None,
        }
    }

    /// Unread-message counter maintained by the store's own write path.
    /// Missing or non-numeric values count as zero.
    pub fn unread_count(&self) -> u64 {
        self.fields
            .get("unreadCount")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// JSON object body of an entity record.
///
/// Field order is preserved as received so API responses echo the
/// caller's layout.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A single stored entity instance, independent of the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Store-assigned identifier (UUID v4 for records created through the API).
    pub id: String,
    /// Entity fields.
    pub data: Document,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Last modification time in milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl EntityRecord {
    /// Creates a record with both timestamps set to `now`.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Document, now: i64) -> Self {
        Self {
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shallow-merges `patch` into the record and bumps `updated_at`.
    ///
    /// A `null` value in the patch removes the field.
    pub fn apply_patch(&mut self, patch: Document, now: i64) {
        for (field, value) in patch {
            if value.is_null() {
                self.data.remove(&field);
            } else {
                self.data.insert(field, value);
            }
        }
        self.updated_at = now;
    }

    /// Returns a string field, if present and a string.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Authentication principal extracted from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Subject of the token.
    pub id: String,
    /// Roles granted to the subject.
    pub roles: Vec<String>,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

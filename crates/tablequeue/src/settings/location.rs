//! Queue identity and table location

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a queue. Unique within one [`crate::QueueService`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Where the rows of a queue live.
///
/// Table and sequence names are sanitized on construction, so whatever reaches
/// the data access layer only contains `[A-Za-z0-9_.]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLocation {
    queue_id: QueueId,
    table_name: String,
    id_sequence: Option<String>,
}

impl QueueLocation {
    pub fn new(queue_id: QueueId, table_name: impl AsRef<str>) -> Self {
        Self {
            queue_id,
            table_name: sanitize_table_name(table_name.as_ref()),
            id_sequence: None,
        }
    }

    /// Use a dedicated sequence for row ids
    pub fn with_id_sequence(mut self, sequence: impl AsRef<str>) -> Self {
        self.id_sequence = Some(sanitize_table_name(sequence.as_ref()));
        self
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_sequence(&self) -> Option<&str> {
        self.id_sequence.as_deref()
    }
}

impl fmt::Display for QueueLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{id={},table={}", self.queue_id, self.table_name)?;
        if let Some(seq) = &self.id_sequence {
            write!(f, ",idSequence={seq}")?;
        }
        f.write_str("}")
    }
}

/// Strip everything except `[A-Za-z0-9_.]` from a table or sequence name.
pub fn sanitize_table_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}

/// Strip everything except `[A-Za-z0-9_]` from a column name.
pub fn sanitize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_keeps_schema_separator() {
        assert_eq!(sanitize_table_name("public.queue_tasks"), "public.queue_tasks");
        assert_eq!(
            sanitize_table_name("tasks; DROP TABLE users;--"),
            "tasksDROPTABLEusers"
        );
    }

    #[test]
    fn test_column_name_drops_dots() {
        assert_eq!(sanitize_column_name("a.b-c d_e"), "abcd_e");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for raw in ["x'y", "ta ble.name", "ünïcode_9", "", "\"quoted\""] {
            let once = sanitize_table_name(raw);
            assert_eq!(sanitize_table_name(&once), once);
            assert!(once
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'));

            let once = sanitize_column_name(raw);
            assert_eq!(sanitize_column_name(&once), once);
            assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn test_location_sanitizes_on_construction() {
        let location = QueueLocation::new(QueueId::new("q"), "my table").with_id_sequence("seq;");
        assert_eq!(location.table_name(), "mytable");
        assert_eq!(location.id_sequence(), Some("seq"));
        assert_eq!(location.to_string(), "{id=q,table=mytable,idSequence=seq}");
    }
}

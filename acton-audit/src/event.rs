//! Audit event and its line rendering
//!
//! An event is a flat label → value map built once per request per sink.
//! File and syslog sinks render it as a single line:
//!
//! ```text
//! request_method="GET", request_path="/middleware", response_status="200 OK"
//! ```
//!
//! Labels are sorted. Lists are comma-joined. `null` renders as an empty
//! value. Tooling downstream greps against this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Separator between rendered `label="value"` pairs
pub const PAIR_SEPARATOR: &str = ", ";

/// Flat audit event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEvent {
    fields: BTreeMap<String, Value>,
}

impl AuditEvent {
    /// Create an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any earlier value under the same label
    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        self.fields.insert(label.into(), value);
    }

    /// Read a field
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.fields.get(label)
    }

    /// Fields in label order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consume the event into its field map
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Render as one `label="value", ...` line (no trailing newline)
    pub fn to_line(&self) -> String {
        self.fields
            .iter()
            .map(|(label, value)| format!("{}=\"{}\"", label, render_value(value)))
            .collect::<Vec<_>>()
            .join(PAIR_SEPARATOR)
    }
}

impl FromIterator<(String, Value)> for AuditEvent {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Render one value for the line format
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_sorted_by_label() {
        let mut event = AuditEvent::new();
        event.insert("zeta", json!("last"));
        event.insert("alpha", json!("first"));
        event.insert("mid", json!(3));

        assert_eq!(event.to_line(), r#"alpha="first", mid="3", zeta="last""#);
    }

    #[test]
    fn test_line_single_field() {
        let mut event = AuditEvent::new();
        event.insert("k", json!("key=abc123"));
        assert_eq!(event.to_line(), r#"k="key=abc123""#);
    }

    #[test]
    fn test_render_values() {
        assert_eq!(render_value(&Value::Null), "");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(80)), "80");
        assert_eq!(render_value(&json!(["127.0.0.1", "10.0.0.1"])), "127.0.0.1,10.0.0.1");
        assert_eq!(render_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_empty_event_renders_empty_line() {
        assert_eq!(AuditEvent::new().to_line(), "");
    }

    #[test]
    fn test_later_insert_overwrites() {
        let mut event = AuditEvent::new();
        event.insert("status", json!("from request"));
        event.insert("status", json!("from response"));
        assert_eq!(event.len(), 1);
        assert_eq!(event.get("status"), Some(&json!("from response")));
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let event: AuditEvent = [("user_id".to_string(), json!(123))].into_iter().collect();
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"user_id": 123}));
    }
}

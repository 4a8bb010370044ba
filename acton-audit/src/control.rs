//! Audit control: what a sink records for one request
//!
//! Each sink owns a default [`AuditControl`] built at construction time.
//! At the start of every request the default is merged with the
//! handler-declared control (a JSON object exposed by the matched resource)
//! to produce the control used for that request only.
//!
//! # Handler-declared control shape
//!
//! ```json
//! {
//!     "enabled": true,
//!     "request_fields": {"request_path": "path"},
//!     "resource_fields": {"user_id": "user_id"},
//!     "syslog": {"enabled": false}
//! }
//! ```
//!
//! - `"enabled": false` at the top level disables auditing for every sink on
//!   the request. An absent `enabled` key means "use the defaults".
//! - A key equal to a sink's name whose value is an object replaces the whole
//!   top-level object for that sink. Sibling top-level keys are not merged in.
//! - Merging is shallow: keys present overwrite, keys absent keep defaults.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Label → field path table
pub type FieldTable = BTreeMap<String, String>;

/// Control key for the master switch
pub const KEY_ENABLED: &str = "enabled";
/// Control key for the request field table
pub const KEY_REQUEST_FIELDS: &str = "request_fields";
/// Control key for the response field table
pub const KEY_RESPONSE_FIELDS: &str = "response_fields";
/// Control key for the resource field table
pub const KEY_RESOURCE_FIELDS: &str = "resource_fields";
/// Control key for the sink allow-list
pub const KEY_SINK_ALLOW_LIST: &str = "sink_allow_list";

/// Resolved audit settings for one sink
///
/// Built-in defaults: disabled, all field tables empty, no allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditControl {
    /// Master switch for the sink
    #[serde(default)]
    pub enabled: bool,

    /// Request-side values to record, keyed by output label
    #[serde(default, deserialize_with = "null_as_empty")]
    pub request_fields: FieldTable,

    /// Response-side values to record, keyed by output label
    #[serde(default, deserialize_with = "null_as_empty")]
    pub response_fields: FieldTable,

    /// Values read from the matched resource, keyed by output label
    #[serde(default, deserialize_with = "null_as_empty")]
    pub resource_fields: FieldTable,

    /// Names of the sinks allowed to receive events (`None` = all sinks)
    #[serde(default)]
    pub sink_allow_list: Option<BTreeSet<String>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<FieldTable, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<FieldTable>::deserialize(deserializer)?.unwrap_or_default())
}

impl AuditControl {
    /// Create a control with built-in defaults (disabled, no fields)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the master switch
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a request field
    pub fn with_request_field(mut self, label: impl Into<String>, path: impl Into<String>) -> Self {
        self.request_fields.insert(label.into(), path.into());
        self
    }

    /// Add a response field
    pub fn with_response_field(
        mut self,
        label: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.response_fields.insert(label.into(), path.into());
        self
    }

    /// Add a resource field
    pub fn with_resource_field(
        mut self,
        label: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        self.resource_fields.insert(label.into(), path.into());
        self
    }

    /// Restrict delivery to the named sinks
    pub fn with_sink_allow_list<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sink_allow_list = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a sink with this name passes the allow-list
    pub fn allows(&self, sink_name: &str) -> bool {
        self.sink_allow_list
            .as_ref()
            .map_or(true, |names| names.contains(sink_name))
    }

    /// Shallow-merge an override object onto a copy of this control
    ///
    /// Known keys overwrite. A key whose value has the wrong shape is ignored
    /// and keeps its current value. Unknown keys are ignored.
    pub fn merged(&self, overrides: &Map<String, Value>) -> Self {
        let mut control = self.clone();

        if let Some(value) = overrides.get(KEY_ENABLED) {
            match value {
                Value::Bool(enabled) => control.enabled = *enabled,
                Value::Null => {}
                other => tracing::warn!(value = %other, "ignoring non-boolean audit `enabled`"),
            }
        }

        merge_table(&mut control.request_fields, overrides, KEY_REQUEST_FIELDS);
        merge_table(&mut control.response_fields, overrides, KEY_RESPONSE_FIELDS);
        merge_table(&mut control.resource_fields, overrides, KEY_RESOURCE_FIELDS);

        if let Some(value) = overrides.get(KEY_SINK_ALLOW_LIST) {
            match serde_json::from_value::<Option<BTreeSet<String>>>(value.clone()) {
                Ok(names) => control.sink_allow_list = names,
                Err(e) => tracing::warn!(error = %e, "ignoring malformed audit `sink_allow_list`"),
            }
        }

        control
    }

    /// Resolve the control a sink uses for one request
    ///
    /// Merges `declared` (the handler-declared control) onto this default.
    /// A nested object under `sink_name` takes the place of the top-level
    /// object. If `declared` is absent or not an object, the default is
    /// returned unchanged. If it carries `"enabled": false` at the top level,
    /// the result is disabled regardless of any nested settings.
    pub fn resolve(&self, declared: Option<&Value>, sink_name: &str) -> Self {
        let Some(Value::Object(top)) = declared else {
            return self.clone();
        };

        if declared_enabled(top) == Some(false) {
            return self.clone().with_enabled(false);
        }

        let overrides = match top.get(sink_name) {
            Some(Value::Object(nested)) => nested,
            Some(other) => {
                tracing::warn!(
                    sink = sink_name,
                    value = %other,
                    "ignoring non-object per-sink audit override"
                );
                top
            }
            None => top,
        };

        self.merged(overrides)
    }
}

fn merge_table(table: &mut FieldTable, overrides: &Map<String, Value>, key: &str) {
    let Some(value) = overrides.get(key) else {
        return;
    };
    match serde_json::from_value::<Option<FieldTable>>(value.clone()) {
        Ok(fields) => *table = fields.unwrap_or_default(),
        Err(e) => tracing::warn!(key, error = %e, "ignoring malformed audit field table"),
    }
}

/// Read the top-level `enabled` flag of a handler-declared control
///
/// Three-way: `Some(true)`, `Some(false)`, or `None` when the key is absent
/// or not a boolean (meaning "use each sink's defaults").
pub fn declared_enabled(declared: &Map<String, Value>) -> Option<bool> {
    declared.get(KEY_ENABLED).and_then(Value::as_bool)
}

/// Whether a handler-declared control switches auditing off for every sink
pub fn is_globally_disabled(declared: Option<&Value>) -> bool {
    match declared {
        Some(Value::Object(top)) => declared_enabled(top) == Some(false),
        _ => false,
    }
}

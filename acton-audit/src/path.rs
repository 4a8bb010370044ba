//! Field path resolution
//!
//! A field path selects one value from a request, response or resource. It
//! has at most two segments separated by the first `.`:
//!
//! - `method` reads the `method` field as-is
//! - `headers.content-type` reads a field that holds a map, then one key
//! - `access_route.0` reads a field that holds a list, then one index
//! - `context.user` reads one key of the record's shared [`AuditContext`]
//!
//! Any miss (unknown field, absent key, bad or out-of-range index) resolves
//! to `null`. Resolution never fails.

use serde_json::{Map, Value};

use crate::record::AuditContext;

/// Separator between the head and tail of a field path
pub const PATH_SEPARATOR: char = '.';

/// Head segment that selects the record's nested context bag
pub const CONTEXT_HEAD: &str = "context";

/// An object that audit field paths can be resolved against
///
/// Implemented by [`RequestRecord`](crate::RequestRecord),
/// [`ResponseRecord`](crate::ResponseRecord) and resource snapshots. The
/// field set is whatever the implementor exposes; unknown names return
/// `None` instead of failing.
pub trait FieldSource {
    /// Read a top-level field by name
    fn field(&self, name: &str) -> Option<Value>;

    /// Nested context bag, if this object carries one
    fn context(&self) -> Option<&AuditContext> {
        None
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Split a path on the first separator into `(head, tail)`
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once(PATH_SEPARATOR) {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}

/// Resolve a field path against an object
///
/// Returns the selected value, or `Value::Null` when any segment misses.
pub fn resolve(path: &str, root: &dyn FieldSource) -> Value {
    let (head, tail) = split_path(path);

    if head == CONTEXT_HEAD {
        if let Some(context) = root.context() {
            return match tail {
                Some(key) => context.get(key).unwrap_or(Value::Null),
                None => Value::Object(context.snapshot()),
            };
        }
    }

    let Some(value) = root.field(head) else {
        tracing::trace!(path, "audit field not present");
        return Value::Null;
    };

    match (value, tail) {
        (Value::Object(mut map), Some(key)) => map.remove(key).unwrap_or(Value::Null),
        (Value::Array(mut items), Some(index)) => match index.parse::<usize>() {
            Ok(i) if i < items.len() => items.swap_remove(i),
            _ => Value::Null,
        },
        (value, _) => value,
    }
}

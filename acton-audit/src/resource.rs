//! Audited resources
//!
//! A resource is the handler-side object bound to a route. It can declare an
//! audit control override and expose attributes that `resource_fields` paths
//! read. Handlers add per-request attributes through [`AuditFields`].
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_audit::{AuditFields, Resource};
//! use serde_json::json;
//!
//! let orders = Resource::new()
//!     .with_control(json!({"syslog": {"enabled": false}}))
//!     .with_attribute("component", "orders");
//!
//! async fn get_order(Extension(fields): Extension<AuditFields>) -> &'static str {
//!     fields.set("order_id", 42);
//!     "ok"
//! }
//! ```

use serde_json::{Map, Value};

use crate::path::FieldSource;
use crate::record::AuditContext;

/// Handler-side object that participates in auditing
pub trait AuditResource: Send + Sync {
    /// Handler-declared control override (see [`crate::control`])
    fn audit_control(&self) -> Option<&Value> {
        None
    }

    /// Read a static attribute
    fn attribute(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }
}

/// Plain resource: an optional control override plus static attributes
#[derive(Debug, Clone, Default)]
pub struct Resource {
    control: Option<Value>,
    attributes: Map<String, Value>,
}

impl Resource {
    /// Create a resource with no override and no attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a control override
    pub fn with_control(mut self, control: Value) -> Self {
        self.control = Some(control);
        self
    }

    /// Add a static attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl AuditResource for Resource {
    fn audit_control(&self) -> Option<&Value> {
        self.control.as_ref()
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}

/// Per-request resource attributes set by the handler
///
/// Inserted into request extensions by the middleware. Values set here take
/// precedence over the resource's static attributes.
#[derive(Debug, Clone, Default)]
pub struct AuditFields(AuditContext);

impl AuditFields {
    /// Create an empty attribute bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name, value);
    }

    /// Read an attribute
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.get(name)
    }
}

/// The resource as seen by `resource_fields` paths
///
/// Reads the per-request [`AuditFields`] first, then the resource's static
/// attributes.
pub struct ResourceView<'a> {
    fields: &'a AuditFields,
    resource: Option<&'a dyn AuditResource>,
}

impl<'a> ResourceView<'a> {
    /// View a matched resource (if any) together with its request fields
    pub fn new(resource: Option<&'a dyn AuditResource>, fields: &'a AuditFields) -> Self {
        Self { fields, resource }
    }
}

impl FieldSource for ResourceView<'_> {
    fn field(&self, name: &str) -> Option<Value> {
        self.fields
            .get(name)
            .or_else(|| self.resource.and_then(|r| r.attribute(name)))
    }
}

//! Audit sinks
//!
//! A sink is a named destination for audit events. Each sink owns a default
//! [`AuditControl`]; the middleware resolves it per request into a
//! [`ResolvedSink`] and hands the built event to [`AuditSink::record`].
//!
//! # Available Sinks
//!
//! - [`RotatingFileSink`]: size-bounded rotating log file
//! - [`SyslogSink`]: RFC 5424 over UDP or TCP
//! - [`MemorySink`]: bounded in-process buffer
//!
//! Custom sinks (for example a database writer) implement [`AuditSink`]
//! and own their connection or pool.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::control::{AuditControl, FieldTable};
use crate::error::Result;
use crate::event::AuditEvent;

pub mod memory;
pub mod rotating_file;
pub mod syslog;

pub use memory::MemorySink;
pub use rotating_file::{RotatingFileOptions, RotatingFileSink};
pub use syslog::{Facility, SyslogOptions, SyslogSink, SyslogTransport};

/// Trait for audit event destinations
///
/// Implementations must serialize their own writes: one sink instance is
/// shared by every in-flight request.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Stable name used for allow-lists and per-sink overrides
    fn name(&self) -> &str;

    /// Control built at construction time
    fn default_control(&self) -> &AuditControl;

    /// Write one event to the destination
    async fn emit(&self, event: &AuditEvent) -> Result<()>;

    /// Gate on the allow-list, then emit
    ///
    /// Returns `Ok(false)` when the allow-list excludes this sink.
    async fn record(&self, control: &AuditControl, event: &AuditEvent) -> Result<bool> {
        if !control.allows(self.name()) {
            tracing::debug!(sink = self.name(), "sink not in audit allow-list");
            return Ok(false);
        }
        self.emit(event).await?;
        Ok(true)
    }
}

/// A sink paired with the control resolved for the current request
#[derive(Clone)]
pub struct ResolvedSink {
    sink: Arc<dyn AuditSink>,
    control: AuditControl,
}

impl std::fmt::Debug for ResolvedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSink")
            .field("name", &self.sink.name())
            .field("control", &self.control)
            .finish()
    }
}

impl ResolvedSink {
    /// Resolve a sink's control against a handler-declared control
    pub fn resolve(sink: Arc<dyn AuditSink>, declared: Option<&Value>) -> Self {
        let control = sink.default_control().resolve(declared, sink.name());
        Self { sink, control }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        self.sink.name()
    }

    /// Whether this sink records anything for the request
    pub fn is_enabled(&self) -> bool {
        self.control.enabled
    }

    /// `(request_fields, response_fields, resource_fields)`
    pub fn field_tables(&self) -> (&FieldTable, &FieldTable, &FieldTable) {
        (
            &self.control.request_fields,
            &self.control.response_fields,
            &self.control.resource_fields,
        )
    }

    /// Allow-list in effect for the request
    pub fn allow_list(&self) -> Option<&BTreeSet<String>> {
        self.control.sink_allow_list.as_ref()
    }

    /// Resolved control
    pub fn control(&self) -> &AuditControl {
        &self.control
    }

    /// Record an event through the sink's allow-list gate
    pub async fn record(&self, event: &AuditEvent) -> Result<bool> {
        self.sink.record(&self.control, event).await
    }
}

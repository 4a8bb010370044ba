//! # acton-audit
//!
//! Request/response audit middleware for axum. For each handled request it
//! builds one flat event per sink from configurable pieces of the request,
//! the matched resource and the response, then hands it to pluggable sinks.
//!
//! ## Features
//!
//! - **Per-request control**: each sink's default [`AuditControl`] merged with
//!   the matched resource's declared control, with per-sink overrides and a
//!   global kill switch
//! - **Field paths**: `method`, `headers.user-agent`, `access_route.0`,
//!   `context.tenant`; misses resolve to `null`
//! - **Sinks**: rotating log file, RFC 5424 syslog (UDP/TCP), in-memory, or
//!   any [`AuditSink`] implementation
//! - **Failure isolation**: sink errors and panics are logged and never reach the caller
//!
//! ## Example
//!
//! ```rust,no_run
//! use acton_audit::prelude::*;
//! use axum::{routing::get, Router};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let audit = AuditMiddleware::builder()
//!         .sink(RotatingFileSink::new(
//!             RotatingFileOptions::new().with_control(
//!                 AuditControl::new()
//!                     .with_enabled(true)
//!                     .with_request_field("k", "query_string"),
//!             ),
//!         )?)
//!         .resource(
//!             "/private",
//!             Resource::new().with_control(json!({"enabled": false})),
//!         )
//!         .build();
//!
//!     let app: Router = Router::new()
//!         .route("/middleware", get(|| async { "ok" }))
//!         .route("/private", get(|| async { "not audited" }))
//!         .route_layer(axum::middleware::from_fn_with_state(
//!             audit,
//!             AuditMiddleware::middleware,
//!         ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod middleware;
pub mod observability;
pub mod path;
pub mod record;
pub mod resource;
pub mod sink;

pub use config::{Config, SinkConfig};
pub use control::{AuditControl, FieldTable};
pub use error::{Error, Result};
pub use event::AuditEvent;
pub use middleware::{build_event, AuditMiddleware, AuditMiddlewareBuilder, AuditPlan};
pub use observability::init_tracing;
pub use path::{resolve, FieldSource};
pub use record::{AuditContext, RequestRecord, ResponseRecord};
pub use resource::{AuditFields, AuditResource, Resource, ResourceView};
pub use sink::{
    AuditSink, Facility, MemorySink, ResolvedSink, RotatingFileOptions, RotatingFileSink,
    SyslogOptions, SyslogSink, SyslogTransport,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, SinkConfig};
    pub use crate::control::AuditControl;
    pub use crate::error::{Error, Result};
    pub use crate::event::AuditEvent;
    pub use crate::middleware::{AuditMiddleware, AuditPlan};
    pub use crate::observability::init_tracing;
    pub use crate::record::{AuditContext, RequestRecord, ResponseRecord};
    pub use crate::resource::{AuditFields, AuditResource, Resource};
    pub use crate::sink::{
        AuditSink, Facility, MemorySink, RotatingFileOptions, RotatingFileSink, SyslogOptions,
        SyslogSink, SyslogTransport,
    };
}

//! Audit middleware for axum
//!
//! Runs one audit cycle per request in two phases:
//!
//! 1. [`AuditMiddleware::pre_route`] reads the matched resource's declared
//!    control and fixes, per sink, what will be recorded ([`AuditPlan`]).
//! 2. [`AuditMiddleware::post_route`] builds one event per enabled sink from
//!    the request, the resource and the response, and dispatches it.
//!
//! Sink failures, panics included, are logged and dropped. They never change
//! the response.

use axum::{
    extract::{FromRequestParts, MatchedPath, RawPathParams, Request, State},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::Config;
use crate::control::{is_globally_disabled, AuditControl};
use crate::error::Result;
use crate::event::AuditEvent;
use crate::path::{resolve, FieldSource};
use crate::record::{AuditContext, RequestRecord, ResponseRecord};
use crate::resource::{AuditFields, AuditResource, ResourceView};
use crate::sink::{AuditSink, ResolvedSink};

/// Decision taken before the handler runs
#[derive(Debug, Clone)]
pub enum AuditPlan {
    /// The resource switched auditing off for every sink
    Skipped,
    /// Per-sink controls resolved for this request
    Resolved(Vec<ResolvedSink>),
}

impl AuditPlan {
    /// Whether the request is not audited at all
    pub fn is_skipped(&self) -> bool {
        matches!(self, AuditPlan::Skipped)
    }

    /// Resolved sinks (empty when skipped)
    pub fn sinks(&self) -> &[ResolvedSink] {
        match self {
            AuditPlan::Skipped => &[],
            AuditPlan::Resolved(sinks) => sinks,
        }
    }
}

struct Inner {
    sinks: Vec<Arc<dyn AuditSink>>,
    resources: HashMap<String, Arc<dyn AuditResource>>,
}

/// Request/response audit middleware
///
/// Holds the sink set and the resources bound to route templates. Cheap to
/// clone. Apply to a router with `route_layer` so that [`MatchedPath`] is
/// available:
///
/// ```rust,ignore
/// use acton_audit::{AuditControl, AuditMiddleware, Resource, RotatingFileOptions, RotatingFileSink};
/// use axum::{routing::get, Router};
///
/// let sink = RotatingFileSink::new(
///     RotatingFileOptions::new().with_control(
///         AuditControl::new()
///             .with_enabled(true)
///             .with_request_field("request_path", "path"),
///     ),
/// )?;
///
/// let audit = AuditMiddleware::builder()
///     .sink(sink)
///     .resource("/users/{id}", Resource::new().with_attribute("component", "users"))
///     .build();
///
/// let app = Router::new()
///     .route("/users/{id}", get(get_user))
///     .route_layer(axum::middleware::from_fn_with_state(
///         audit,
///         AuditMiddleware::middleware,
///     ));
/// ```
#[derive(Clone)]
pub struct AuditMiddleware {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AuditMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<&str> = self.inner.sinks.iter().map(|s| s.name()).collect();
        let routes: Vec<&String> = self.inner.resources.keys().collect();
        f.debug_struct("AuditMiddleware")
            .field("sinks", &sinks)
            .field("routes", &routes)
            .finish()
    }
}

impl AuditMiddleware {
    /// Start building a middleware
    pub fn builder() -> AuditMiddlewareBuilder {
        AuditMiddlewareBuilder::default()
    }

    /// Build the sink set described by a loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder();
        for sink in &config.sinks {
            builder = builder.shared_sink(sink.build()?);
        }
        Ok(builder.build())
    }

    /// Configured sinks, in dispatch order
    pub fn sinks(&self) -> &[Arc<dyn AuditSink>] {
        &self.inner.sinks
    }

    /// Resource bound to a route template
    pub fn resource_for(&self, route: &str) -> Option<Arc<dyn AuditResource>> {
        self.inner.resources.get(route).cloned()
    }

    /// Pre-route hook: resolve every sink's control for this request
    pub fn pre_route(
        &self,
        request: &RequestRecord,
        resource: Option<&dyn AuditResource>,
    ) -> AuditPlan {
        let declared = resource.and_then(|r| r.audit_control());

        if is_globally_disabled(declared) {
            tracing::debug!(path = %request.path, "auditing disabled by resource");
            return AuditPlan::Skipped;
        }

        AuditPlan::Resolved(
            self.inner
                .sinks
                .iter()
                .map(|sink| ResolvedSink::resolve(sink.clone(), declared))
                .collect(),
        )
    }

    /// Post-route hook: build and dispatch one event per enabled sink
    ///
    /// Returns the number of sinks that recorded the event.
    pub async fn post_route(
        &self,
        plan: AuditPlan,
        request: &RequestRecord,
        response: &ResponseRecord,
        resource: &ResourceView<'_>,
        succeeded: bool,
    ) -> usize {
        let sinks = match plan {
            AuditPlan::Skipped => return 0,
            AuditPlan::Resolved(sinks) => sinks,
        };

        let mut recorded = 0;
        for sink in &sinks {
            if !sink.is_enabled() {
                tracing::trace!(sink = sink.name(), "audit sink disabled for request");
                continue;
            }

            let event = build_event(sink.control(), request, resource, response);
            match AssertUnwindSafe(sink.record(&event)).catch_unwind().await {
                Ok(Ok(true)) => recorded += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(sink = sink.name(), error = %e, "Failed to record audit event");
                }
                Err(panic) => {
                    tracing::warn!(
                        sink = sink.name(),
                        panic = panic_message(panic.as_ref()),
                        "Audit sink panicked while recording"
                    );
                }
            }
        }

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            succeeded,
            recorded,
            "Audit cycle complete"
        );
        recorded
    }

    /// Middleware function for axum
    ///
    /// Use with `axum::middleware::from_fn_with_state`. Inserts an
    /// [`AuditContext`] and an [`AuditFields`] into the request extensions
    /// for the handler to fill in.
    pub async fn middleware(State(audit): State<Self>, request: Request, next: Next) -> Response {
        let (mut parts, body) = request.into_parts();

        let resource = parts
            .extensions
            .get::<MatchedPath>()
            .and_then(|route| audit.resource_for(route.as_str()));

        let params: Vec<(String, String)> =
            match RawPathParams::from_request_parts(&mut parts, &()).await {
                Ok(params) => params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                Err(_) => Vec::new(),
            };

        let context = parts
            .extensions
            .get::<AuditContext>()
            .cloned()
            .unwrap_or_default();
        parts.extensions.insert(context.clone());

        let fields = parts
            .extensions
            .get::<AuditFields>()
            .cloned()
            .unwrap_or_default();
        parts.extensions.insert(fields.clone());

        let record = RequestRecord::from_parts(&parts)
            .with_params(params)
            .with_context(context.clone());
        let plan = audit.pre_route(&record, resource.as_deref());

        let response = next.run(Request::from_parts(parts, body)).await;

        if plan.is_skipped() {
            return response;
        }

        let mut response_record = ResponseRecord::from_response(&response);
        if response.extensions().get::<AuditContext>().is_none() {
            response_record.context = context;
        }

        let succeeded = !response.status().is_server_error();
        let view = ResourceView::new(resource.as_deref(), &fields);
        audit
            .post_route(plan, &record, &response_record, &view, succeeded)
            .await;

        response
    }
}

/// Builder for [`AuditMiddleware`]
#[derive(Default)]
pub struct AuditMiddlewareBuilder {
    sinks: Vec<Arc<dyn AuditSink>>,
    resources: HashMap<String, Arc<dyn AuditResource>>,
}

impl AuditMiddlewareBuilder {
    /// Add a sink
    pub fn sink<S: AuditSink + 'static>(self, sink: S) -> Self {
        self.shared_sink(Arc::new(sink))
    }

    /// Add a sink that is also held elsewhere
    pub fn shared_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        if self.sinks.iter().any(|s| s.name() == sink.name()) {
            tracing::warn!(sink = sink.name(), "duplicate audit sink name");
        }
        self.sinks.push(sink);
        self
    }

    /// Bind a resource to a route template (e.g. `/users/{id}`)
    pub fn resource<R: AuditResource + 'static>(self, route: impl Into<String>, resource: R) -> Self {
        self.shared_resource(route, Arc::new(resource))
    }

    /// Bind a shared resource to a route template
    pub fn shared_resource(
        mut self,
        route: impl Into<String>,
        resource: Arc<dyn AuditResource>,
    ) -> Self {
        self.resources.insert(route.into(), resource);
        self
    }

    /// Finish building
    pub fn build(self) -> AuditMiddleware {
        AuditMiddleware {
            inner: Arc::new(Inner {
                sinks: self.sinks,
                resources: self.resources,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Build one sink's event from the three sources
///
/// Request fields are resolved first, then resource fields, then response
/// fields. On a label collision the later source wins.
pub fn build_event(
    control: &AuditControl,
    request: &dyn FieldSource,
    resource: &dyn FieldSource,
    response: &dyn FieldSource,
) -> AuditEvent {
    let mut event = AuditEvent::new();
    let sources = [
        (&control.request_fields, request),
        (&control.resource_fields, resource),
        (&control.response_fields, response),
    ];
    for (table, source) in sources {
        for (label, path) in table {
            event.insert(label.clone(), resolve(path, source));
        }
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::resource::Resource;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use http::{Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};

    struct FailingSink {
        control: AuditControl,
    }

    #[async_trait]
    impl AuditSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn default_control(&self) -> &AuditControl {
            &self.control
        }

        async fn emit(&self, _event: &AuditEvent) -> Result<()> {
            Err(Error::Syslog("collector down".to_string()))
        }
    }

    struct PanickingSink {
        control: AuditControl,
    }

    #[async_trait]
    impl AuditSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        fn default_control(&self) -> &AuditControl {
            &self.control
        }

        async fn emit(&self, _event: &AuditEvent) -> Result<()> {
            panic!("database session lost");
        }
    }

    fn request(uri: &str) -> RequestRecord {
        let (parts, ()) = HttpRequest::get(uri).body(()).unwrap().into_parts();
        RequestRecord::from_parts(&parts)
    }

    fn enabled(fields: &[(&str, &str)]) -> AuditControl {
        fields
            .iter()
            .fold(AuditControl::new().with_enabled(true), |c, (label, path)| {
                c.with_request_field(*label, *path)
            })
    }

    async fn run(
        audit: &AuditMiddleware,
        resource: Option<&dyn AuditResource>,
        fields: &AuditFields,
    ) -> usize {
        let req = request("/middleware?key=abc123");
        let plan = audit.pre_route(&req, resource);
        let resp = ResponseRecord::from_status(StatusCode::OK);
        let view = ResourceView::new(resource, fields);
        audit.post_route(plan, &req, &resp, &view, true).await
    }

    #[test]
    fn test_build_event_order_and_collisions() {
        let control = AuditControl::new()
            .with_request_field("status", "method")
            .with_request_field("k", "query_string")
            .with_resource_field("status", "state")
            .with_response_field("status", "status");
        let req = request("/x?a=1");
        let resource: serde_json::Map<String, Value> =
            [("state".to_string(), json!("busy"))].into_iter().collect();
        let resp = ResponseRecord::from_status(StatusCode::NOT_FOUND);

        let event = build_event(&control, &req, &resource, &resp);
        assert_eq!(event.get("k"), Some(&json!("a=1")));
        assert_eq!(event.get("status"), Some(&json!("404 Not Found")));
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn test_build_event_empty_tables() {
        let req = request("/");
        let resp = ResponseRecord::from_status(StatusCode::OK);
        let event = build_event(&AuditControl::new(), &req, &serde_json::Map::new(), &resp);
        assert!(event.is_empty());
    }

    #[test]
    fn test_pre_route_global_kill_switch() {
        let audit = AuditMiddleware::builder()
            .sink(MemorySink::new("a", enabled(&[])))
            .build();
        let resource = Resource::new().with_control(json!({"enabled": false, "a": {"enabled": true}}));

        let plan = audit.pre_route(&request("/"), Some(&resource));
        assert!(plan.is_skipped());
        assert!(plan.sinks().is_empty());
    }

    #[test]
    fn test_pre_route_is_repeatable() {
        let audit = AuditMiddleware::builder()
            .sink(MemorySink::new("a", enabled(&[("m", "method")])))
            .build();
        let resource = Resource::new().with_control(json!({"request_fields": {"p": "path"}}));
        let req = request("/");

        let first = audit.pre_route(&req, Some(&resource));
        let second = audit.pre_route(&req, Some(&resource));
        assert_eq!(first.sinks()[0].control(), second.sinks()[0].control());
        assert_eq!(first.sinks()[0].control().request_fields["p"], "path");
    }

    #[test]
    fn test_pre_route_without_resource_uses_defaults() {
        let control = enabled(&[("m", "method")]);
        let audit = AuditMiddleware::builder()
            .sink(MemorySink::new("a", control.clone()))
            .build();

        let plan = audit.pre_route(&request("/"), None);
        assert_eq!(plan.sinks()[0].control(), &control);
    }

    #[tokio::test]
    async fn test_post_route_per_sink_override() {
        let a = Arc::new(MemorySink::new("a", enabled(&[("k", "query_string")])));
        let b = Arc::new(MemorySink::new("b", enabled(&[("k", "query_string")])));
        let audit = AuditMiddleware::builder()
            .shared_sink(a.clone())
            .shared_sink(b.clone())
            .build();
        let resource = Resource::new().with_control(json!({"enabled": true, "a": {"enabled": false}}));

        let recorded = run(&audit, Some(&resource), &AuditFields::new()).await;
        assert_eq!(recorded, 1);
        assert!(a.events().is_empty());
        assert_eq!(b.events()[0].get("k"), Some(&json!("key=abc123")));
    }

    #[tokio::test]
    async fn test_post_route_skipped_touches_nothing() {
        let a = Arc::new(MemorySink::new("a", enabled(&[("k", "query_string")])));
        let audit = AuditMiddleware::builder().shared_sink(a.clone()).build();
        let resource = Resource::new().with_control(json!({"enabled": false}));

        assert_eq!(run(&audit, Some(&resource), &AuditFields::new()).await, 0);
        assert!(a.events().is_empty());
    }

    #[tokio::test]
    async fn test_post_route_allow_list_gates_sink() {
        let x = Arc::new(MemorySink::new("x", enabled(&[("m", "method")])));
        let y = Arc::new(MemorySink::new("y", enabled(&[("m", "method")])));
        let audit = AuditMiddleware::builder()
            .shared_sink(x.clone())
            .shared_sink(y.clone())
            .build();
        let resource = Resource::new().with_control(json!({"sink_allow_list": ["x"]}));

        assert_eq!(run(&audit, Some(&resource), &AuditFields::new()).await, 1);
        assert_eq!(x.events().len(), 1);
        assert!(y.events().is_empty());
    }

    #[tokio::test]
    async fn test_post_route_failing_sink_does_not_stop_others() {
        let memory = Arc::new(MemorySink::new("memory", enabled(&[("m", "method")])));
        let audit = AuditMiddleware::builder()
            .sink(FailingSink {
                control: enabled(&[("m", "method")]),
            })
            .shared_sink(memory.clone())
            .build();

        assert_eq!(run(&audit, None, &AuditFields::new()).await, 1);
        assert_eq!(memory.events()[0].get("m"), Some(&json!("GET")));
    }

    #[tokio::test]
    async fn test_post_route_panicking_sink_does_not_stop_others() {
        let memory = Arc::new(MemorySink::new("memory", enabled(&[("m", "method")])));
        let audit = AuditMiddleware::builder()
            .sink(PanickingSink {
                control: enabled(&[("m", "method")]),
            })
            .shared_sink(memory.clone())
            .build();

        assert_eq!(run(&audit, None, &AuditFields::new()).await, 1);
        assert_eq!(memory.events().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "owned boom");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_post_route_resource_fields() {
        let control = AuditControl::new()
            .with_enabled(true)
            .with_resource_field("component", "component")
            .with_resource_field("data", "my_audit_data")
            .with_resource_field("missing", "nope");
        let memory = Arc::new(MemorySink::new("memory", control));
        let audit = AuditMiddleware::builder().shared_sink(memory.clone()).build();
        let resource = Resource::new().with_attribute("component", "orders");
        let fields = AuditFields::new();
        fields.set("my_audit_data", "abc");

        run(&audit, Some(&resource), &fields).await;
        let event = &memory.events()[0];
        assert_eq!(event.get("component"), Some(&json!("orders")));
        assert_eq!(event.get("data"), Some(&json!("abc")));
        assert_eq!(event.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn test_resource_lookup_by_route() {
        let audit = AuditMiddleware::builder()
            .resource("/users/{id}", Resource::new().with_attribute("component", "users"))
            .build();

        let resource = audit.resource_for("/users/{id}").unwrap();
        assert_eq!(resource.attribute("component"), Some(json!("users")));
        assert!(audit.resource_for("/users/7").is_none());
        assert!(format!("{:?}", audit).contains("/users/{id}"));
    }
}

//! Request and response records
//!
//! Snapshots of the HTTP objects that audit field paths are resolved
//! against. Both records expose a fixed field set; see the field name
//! constants on each type.

use axum::extract::ConnectInfo;
use http::{header, request, HeaderMap, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};

use crate::path::FieldSource;

/// Shared, mutable key/value bag reachable through `context.<key>` paths
///
/// The middleware inserts one into the request extensions before the handler
/// runs. Handlers extract it (`Extension<AuditContext>`) and add values that
/// end up in the audit event. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl AuditContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Remove a value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Copy of all values
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Request snapshot taken before the handler runs
///
/// Fields: `method`, `scheme`, `host`, `port`, `path`, `query_string`,
/// `uri`, `url`, `forwarded_host`, `remote_addr`, `access_route`, `referer`,
/// `user_agent`, `content_type`, `content_length`, `headers`, `params`, and
/// the `context` bag.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// HTTP method
    pub method: String,
    /// `http` or `https`
    pub scheme: String,
    /// Host name without port
    pub host: Option<String>,
    /// Explicit port, or the scheme default
    pub port: u16,
    /// Request path
    pub path: String,
    /// Raw query string without the leading `?` (empty when absent)
    pub query_string: String,
    /// Original host as reported by a proxy, else `host`
    pub forwarded_host: Option<String>,
    /// Peer address of the connection, when known
    pub remote_addr: Option<IpAddr>,
    /// Client address followed by known proxy addresses
    pub access_route: Vec<String>,
    /// Request headers (lowercase names; repeated headers become lists)
    pub headers: Map<String, Value>,
    /// Route parameters captured by the router
    pub params: BTreeMap<String, String>,
    /// Shared context bag
    pub context: AuditContext,
}

impl RequestRecord {
    /// Snapshot a request from its head
    ///
    /// Reads `ConnectInfo<SocketAddr>` from extensions for the peer address
    /// and an existing [`AuditContext`] extension, if one was inserted
    /// upstream.
    pub fn from_parts(parts: &request::Parts) -> Self {
        let headers = &parts.headers;
        let uri = &parts.uri;

        let scheme = uri
            .scheme_str()
            .map(str::to_string)
            .or_else(|| first_header_value(headers, "x-forwarded-proto"))
            .unwrap_or_else(|| "http".to_string())
            .to_ascii_lowercase();

        let authority = uri.authority().cloned().or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<http::uri::Authority>().ok())
        });

        let host = authority.as_ref().map(|a| a.host().to_string());
        let port = authority
            .as_ref()
            .and_then(|a| a.port_u16())
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        let forwarded_host = first_header_value(headers, "x-forwarded-host").or(host.clone());

        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let context = parts
            .extensions
            .get::<AuditContext>()
            .cloned()
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            scheme,
            host,
            port,
            path: uri.path().to_string(),
            query_string: uri.query().unwrap_or_default().to_string(),
            forwarded_host,
            remote_addr,
            access_route: access_route(headers, remote_addr),
            headers: header_snapshot(headers),
            params: BTreeMap::new(),
            context,
        }
    }

    /// Attach captured route parameters
    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Use the given context bag
    pub fn with_context(mut self, context: AuditContext) -> Self {
        self.context = context;
        self
    }

    fn header(&self, name: &str) -> Option<Value> {
        self.headers.get(name).cloned()
    }

    fn uri(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }

    fn url(&self) -> String {
        let default_port = if self.scheme == "https" { 443 } else { 80 };
        let host = self.host.as_deref().unwrap_or("localhost");
        if self.port == default_port {
            format!("{}://{}{}", self.scheme, host, self.uri())
        } else {
            format!("{}://{}:{}{}", self.scheme, host, self.port, self.uri())
        }
    }
}

impl FieldSource for RequestRecord {
    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "method" => json!(self.method),
            "scheme" => json!(self.scheme),
            "host" => json!(self.host),
            "port" => json!(self.port),
            "path" => json!(self.path),
            "query_string" => json!(self.query_string),
            "uri" => json!(self.uri()),
            "url" => json!(self.url()),
            "forwarded_host" => json!(self.forwarded_host),
            "remote_addr" => json!(self.remote_addr.map(|ip| ip.to_string())),
            "access_route" => json!(self.access_route),
            "referer" => self.header("referer").unwrap_or(Value::Null),
            "user_agent" => self.header("user-agent").unwrap_or(Value::Null),
            "content_type" => self.header("content-type").unwrap_or(Value::Null),
            "content_length" => content_length(&self.headers),
            "headers" => Value::Object(self.headers.clone()),
            "params" => json!(self.params),
            _ => return None,
        };
        Some(value)
    }

    fn context(&self) -> Option<&AuditContext> {
        Some(&self.context)
    }
}

/// Response snapshot taken after the handler ran
///
/// Fields: `status` (e.g. `"200 OK"`), `status_code`, `headers`,
/// `content_type`, `content_length`, and the `context` bag.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    /// Response status
    pub status: StatusCode,
    /// Response headers (lowercase names; repeated headers become lists)
    pub headers: Map<String, Value>,
    /// Shared context bag attached by the handler, if any
    pub context: AuditContext,
}

impl ResponseRecord {
    /// Snapshot a response
    pub fn from_response<B>(response: &Response<B>) -> Self {
        Self {
            status: response.status(),
            headers: header_snapshot(response.headers()),
            context: response
                .extensions()
                .get::<AuditContext>()
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Build a record from a bare status (no headers)
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Map::new(),
            context: AuditContext::default(),
        }
    }
}

impl FieldSource for ResponseRecord {
    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "status" => json!(self.status.to_string()),
            "status_code" => json!(self.status.as_u16()),
            "headers" => Value::Object(self.headers.clone()),
            "content_type" => self.headers.get("content-type").cloned().unwrap_or(Value::Null),
            "content_length" => content_length(&self.headers),
            _ => return None,
        };
        Some(value)
    }

    fn context(&self) -> Option<&AuditContext> {
        Some(&self.context)
    }
}

/// Snapshot a header map into a JSON object
///
/// Names are lowercase (as stored by `http`). Values that are not valid
/// UTF-8 are converted lossily. A header sent more than once becomes a list.
pub fn header_snapshot(headers: &HeaderMap) -> Map<String, Value> {
    let mut snapshot = Map::new();
    for name in headers.keys() {
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let value = if values.len() == 1 {
            values.swap_remove(0)
        } else {
            Value::Array(values)
        };
        snapshot.insert(name.as_str().to_string(), value);
    }
    snapshot
}

fn content_length(headers: &Map<String, Value>) -> Value {
    headers
        .get("content-length")
        .and_then(Value::as_str)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Value::from)
        .unwrap_or(Value::Null)
}

fn first_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Client and proxy addresses, in order
///
/// Taken from the first of `Forwarded` (`for=` parameters),
/// `X-Forwarded-For` or `X-Real-IP` that is present. Falls back to the peer
/// address when none of them are.
fn access_route(headers: &HeaderMap, remote_addr: Option<IpAddr>) -> Vec<String> {
    let from_forwarded = headers
        .get(header::FORWARDED)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .flat_map(|element| element.split(';'))
                .filter_map(|pair| {
                    let (key, value) = pair.trim().split_once('=')?;
                    key.eq_ignore_ascii_case("for")
                        .then(|| value.trim_matches('"').to_string())
                })
                .collect::<Vec<_>>()
        })
        .filter(|route| !route.is_empty());

    let route = from_forwarded
        .or_else(|| comma_list(headers, "x-forwarded-for"))
        .or_else(|| comma_list(headers, "x-real-ip"))
        .unwrap_or_else(|| {
            remote_addr
                .map(|ip| vec![ip.to_string()])
                .unwrap_or_default()
        });

    let mut deduplicated: Vec<String> = Vec::with_capacity(route.len());
    for address in route {
        if !deduplicated.contains(&address) {
            deduplicated.push(address);
        }
    }
    deduplicated
}

fn comma_list(headers: &HeaderMap, name: &str) -> Option<Vec<String>> {
    let list: Vec<String> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    (!list.is_empty()).then_some(list)
}

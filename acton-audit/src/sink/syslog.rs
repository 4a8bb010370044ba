//! Syslog RFC 5424 sink
//!
//! Sends each audit event as one syslog message over UDP or TCP:
//!
//! ```text
//! <14>1 2026-01-01T00:00:00.000000Z - acton-audit - audit - request_method="GET", ...
//! ```
//!
//! The connection is opened on first use and kept for later events. A TCP
//! connection the collector has closed is dropped before reuse, and a send
//! that fails drops the connection and is retried once on a fresh one.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::Mutex;

use super::AuditSink;
use crate::control::AuditControl;
use crate::error::{Error, Result};
use crate::event::AuditEvent;

/// Default sink name
pub const DEFAULT_NAME: &str = "syslog";

/// Severity used for every audit message (informational)
pub const SEVERITY_INFO: u8 = 6;

/// RFC 5424 MSGID for audit messages
const MSG_ID: &str = "audit";

/// RFC 5424 APP-NAME length limit
const APP_NAME_MAX: usize = 48;

/// RFC 5424 HOSTNAME length limit
const HOSTNAME_MAX: usize = 255;

/// Transport to the syslog collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogTransport {
    /// One datagram per message
    #[default]
    Udp,
    /// Newline-framed stream (RFC 5425 octet-stuffing not applied)
    Tcp,
}

/// Syslog facility code (0-23)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facility(u8);

impl Facility {
    /// Kernel messages (0)
    pub const KERN: Facility = Facility(0);
    /// User-level messages (1), the default
    pub const USER: Facility = Facility(1);
    /// System daemons (3)
    pub const DAEMON: Facility = Facility(3);
    /// Security/authorization messages (4)
    pub const AUTH: Facility = Facility(4);
    /// Log audit (13)
    pub const AUDIT: Facility = Facility(13);
    /// Local use 0 (16)
    pub const LOCAL0: Facility = Facility(16);

    const NAMES: [&'static str; 24] = [
        "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron",
        "authpriv", "ftp", "ntp", "audit", "alert", "clock", "local0", "local1", "local2",
        "local3", "local4", "local5", "local6", "local7",
    ];

    /// Build a facility from its numeric code
    pub fn from_code(code: u8) -> Result<Self> {
        if (code as usize) < Self::NAMES.len() {
            Ok(Self(code))
        } else {
            Err(Error::InvalidConfig(format!(
                "syslog facility code {} out of range 0-23",
                code
            )))
        }
    }

    /// Numeric code
    pub fn code(self) -> u8 {
        self.0
    }

    /// Conventional name
    pub fn name(self) -> &'static str {
        Self::NAMES[self.0 as usize]
    }

    /// PRI value for the given severity
    pub fn priority(self, severity: u8) -> u16 {
        u16::from(self.0) * 8 + u16::from(severity)
    }
}

impl Default for Facility {
    fn default() -> Self {
        Self::USER
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Facility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(code) = Self::NAMES.iter().position(|name| *name == lower) {
            return Ok(Self(code as u8));
        }
        match lower.as_str() {
            "security" => Ok(Self::AUTH),
            _ => match lower.parse::<u8>() {
                Ok(code) => Self::from_code(code),
                Err(_) => Err(Error::InvalidConfig(format!(
                    "unknown syslog facility '{}'",
                    s
                ))),
            },
        }
    }
}

impl Serialize for Facility {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Facility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(code) => Facility::from_code(code).map_err(serde::de::Error::custom),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Options for [`SyslogSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyslogOptions {
    /// Sink name (default: `syslog`)
    pub name: String,

    /// Default audit control
    pub control: AuditControl,

    /// Collector host (default: `localhost`)
    pub host: String,

    /// Collector port (default: 514)
    pub port: u16,

    /// Facility name or code (default: `user`)
    pub facility: Facility,

    /// Transport (default: `udp`)
    pub transport: SyslogTransport,

    /// RFC 5424 APP-NAME (default: `acton-audit`)
    pub app_name: String,

    /// RFC 5424 HOSTNAME (default: `-`)
    pub hostname: String,
}

impl Default for SyslogOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            control: AuditControl::default(),
            host: "localhost".to_string(),
            port: 514,
            facility: Facility::default(),
            transport: SyslogTransport::default(),
            app_name: "acton-audit".to_string(),
            hostname: "-".to_string(),
        }
    }
}

impl SyslogOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sink name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the default audit control
    pub fn with_control(mut self, control: AuditControl) -> Self {
        self.control = control;
        self
    }

    /// Set the collector address
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the facility
    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = facility;
        self
    }

    /// Set the transport
    pub fn with_transport(mut self, transport: SyslogTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Set the APP-NAME
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the HOSTNAME
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

#[derive(Debug)]
enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Connection {
    async fn send(&mut self, message: &str) -> std::io::Result<()> {
        match self {
            Connection::Udp(socket) => {
                socket.send(message.as_bytes()).await?;
            }
            Connection::Tcp(stream) => {
                let mut framed = String::with_capacity(message.len() + 1);
                framed.push_str(message);
                framed.push('\n');
                stream.write_all(framed.as_bytes()).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Whether the collector has closed a TCP connection
    ///
    /// Collectors never write back, so a readable socket means EOF or reset.
    fn is_closed(&self) -> bool {
        match self {
            Connection::Udp(_) => false,
            Connection::Tcp(stream) => {
                let mut buf = [0u8; 64];
                match stream.try_read(&mut buf) {
                    Ok(0) => true,
                    Ok(_) => false,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
                    Err(_) => true,
                }
            }
        }
    }
}

/// Audit sink sending RFC 5424 messages to a syslog collector
#[derive(Debug)]
pub struct SyslogSink {
    options: SyslogOptions,
    connection: Mutex<Option<Connection>>,
}

impl SyslogSink {
    /// Create the sink
    ///
    /// No connection is made until the first event is emitted.
    pub fn new(options: SyslogOptions) -> Self {
        tracing::info!(
            sink = %options.name,
            host = %options.host,
            port = options.port,
            facility = %options.facility,
            transport = ?options.transport,
            "Syslog audit sink initialized"
        );

        Self {
            options,
            connection: Mutex::new(None),
        }
    }

    /// Options the sink was built with
    pub fn options(&self) -> &SyslogOptions {
        &self.options
    }

    /// Format an event as an RFC 5424 message
    ///
    /// Format: `<PRI>1 TIMESTAMP HOSTNAME APP-NAME - audit - MSG`
    pub fn format_message(&self, event: &AuditEvent) -> String {
        let pri = self.options.facility.priority(SEVERITY_INFO);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");

        format!(
            "<{}>1 {} {} {} - {} - {}",
            pri,
            timestamp,
            header_field(&self.options.hostname, HOSTNAME_MAX),
            header_field(&self.options.app_name, APP_NAME_MAX),
            MSG_ID,
            event.to_line()
        )
    }

    async fn connect(&self) -> std::io::Result<Connection> {
        let address = self.resolve_address().await?;

        match self.options.transport {
            SyslogTransport::Udp => {
                let bind = if address.is_ipv4() {
                    "0.0.0.0:0"
                } else {
                    "[::]:0"
                };
                let socket = UdpSocket::bind(bind).await?;
                socket.connect(address).await?;
                Ok(Connection::Udp(socket))
            }
            SyslogTransport::Tcp => Ok(Connection::Tcp(TcpStream::connect(address).await?)),
        }
    }

    async fn resolve_address(&self) -> std::io::Result<SocketAddr> {
        lookup_host((self.options.host.as_str(), self.options.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address for {}:{}", self.options.host, self.options.port),
                )
            })
    }

    async fn send_once(&self, slot: &mut Option<Connection>, message: &str) -> std::io::Result<()> {
        let mut connection = match slot.take() {
            Some(connection) if connection.is_closed() => {
                tracing::debug!(
                    host = %self.options.host,
                    port = self.options.port,
                    "Syslog connection closed by peer, reconnecting"
                );
                self.connect().await?
            }
            Some(connection) => connection,
            None => self.connect().await?,
        };
        connection.send(message).await?;
        *slot = Some(connection);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SyslogSink {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn default_control(&self) -> &AuditControl {
        &self.options.control
    }

    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let message = self.format_message(event);
        let mut slot = self.connection.lock().await;

        if let Err(first) = self.send_once(&mut slot, &message).await {
            tracing::debug!(error = %first, "Syslog send failed, reconnecting");
            self.send_once(&mut slot, &message).await.map_err(|e| {
                tracing::warn!(
                    host = %self.options.host,
                    port = self.options.port,
                    error = %e,
                    "Failed to send audit event to syslog"
                );
                Error::Syslog(e.to_string())
            })?;
        }
        Ok(())
    }
}

/// RFC 5424 header fields are printable ASCII without spaces, or `-`
fn header_field(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(max_len)
        .collect();
    if cleaned.is_empty() {
        "-".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinSet;

    fn event() -> AuditEvent {
        [
            ("request_method".to_string(), json!("GET")),
            ("request_path".to_string(), json!("/middleware")),
        ]
        .into_iter()
        .collect()
    }

    fn keyed(key: &str) -> AuditEvent {
        [("k".to_string(), json!(key))].into_iter().collect()
    }

    #[test]
    fn test_format_rfc5424() {
        let sink = SyslogSink::new(
            SyslogOptions::new()
                .with_facility(Facility::AUDIT)
                .with_app_name("test-app"),
        );
        let message = sink.format_message(&event());

        // PRI = 13*8 + 6 = 110
        assert!(message.starts_with("<110>1 "));
        assert!(message.contains(" - test-app - audit - "));
        assert!(message.ends_with(r#"request_method="GET", request_path="/middleware""#));
    }

    #[test]
    fn test_default_priority_is_user_info() {
        let sink = SyslogSink::new(SyslogOptions::new());
        assert!(sink.format_message(&AuditEvent::new()).starts_with("<14>1 "));
    }

    #[test]
    fn test_header_field() {
        assert_eq!(header_field("acton audit", APP_NAME_MAX), "actonaudit");
        assert_eq!(header_field("", HOSTNAME_MAX), "-");
        assert_eq!(header_field("web-01", HOSTNAME_MAX), "web-01");
    }

    #[test]
    fn test_header_length_limits() {
        let long = "h".repeat(100);
        let sink = SyslogSink::new(
            SyslogOptions::new()
                .with_hostname(long.clone())
                .with_app_name("a".repeat(100)),
        );
        let message = sink.format_message(&AuditEvent::new());
        let fields: Vec<&str> = message.split(' ').collect();

        assert_eq!(fields[2], long);
        assert_eq!(fields[3], "a".repeat(48));
        assert_eq!(header_field(&"h".repeat(300), HOSTNAME_MAX).len(), 255);
    }

    #[test]
    fn test_facility_parsing() {
        assert_eq!("user".parse::<Facility>().unwrap(), Facility::USER);
        assert_eq!("LOCAL0".parse::<Facility>().unwrap(), Facility::LOCAL0);
        assert_eq!("local7".parse::<Facility>().unwrap().code(), 23);
        assert_eq!("security".parse::<Facility>().unwrap(), Facility::AUTH);
        assert_eq!("13".parse::<Facility>().unwrap(), Facility::AUDIT);
        assert!("bogus".parse::<Facility>().is_err());
        assert!(Facility::from_code(24).is_err());
    }

    #[test]
    fn test_facility_serde() {
        let from_name: Facility = serde_json::from_value(json!("daemon")).unwrap();
        let from_code: Facility = serde_json::from_value(json!(16)).unwrap();
        assert_eq!(from_name, Facility::DAEMON);
        assert_eq!(from_code, Facility::LOCAL0);
        assert_eq!(serde_json::to_value(Facility::KERN).unwrap(), json!("kern"));
        assert!(serde_json::from_value::<Facility>(json!(99)).is_err());
    }

    #[test]
    fn test_options_defaults() {
        let options = SyslogOptions::default();
        assert_eq!(options.name, "syslog");
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 514);
        assert_eq!(options.facility, Facility::USER);
        assert_eq!(options.transport, SyslogTransport::Udp);
    }

    #[tokio::test]
    async fn test_udp_delivery() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = SyslogSink::new(SyslogOptions::new().with_address("127.0.0.1", port));
        sink.emit(&event()).await.unwrap();
        sink.emit(&event()).await.unwrap();

        let mut buf = [0u8; 2048];
        for _ in 0..2 {
            let n = receiver.recv(&mut buf).await.unwrap();
            let message = std::str::from_utf8(&buf[..n]).unwrap();
            assert!(message.starts_with("<14>1 "));
            assert!(message.contains(r#"request_path="/middleware""#));
        }
    }

    #[tokio::test]
    async fn test_tcp_delivery_newline_framed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sink = SyslogSink::new(
            SyslogOptions::new()
                .with_address("127.0.0.1", port)
                .with_transport(SyslogTransport::Tcp),
        );

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            (first, second)
        });

        sink.emit(&event()).await.unwrap();
        sink.emit(&event()).await.unwrap();

        let (first, second) = reader.await.unwrap();
        assert!(first.contains(r#"request_method="GET""#));
        assert!(second.starts_with("<14>1 "));
    }

    #[tokio::test]
    async fn test_tcp_reconnects_after_collector_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = SyslogSink::new(
            SyslogOptions::new()
                .with_address("127.0.0.1", addr.port())
                .with_transport(SyslogTransport::Tcp),
        );

        let first = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });
        sink.emit(&keyed("before")).await.unwrap();
        assert!(first.await.unwrap().ends_with(r#"k="before""#));

        // stream and listener are gone; let the FIN reach the client
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listener = TcpListener::bind(addr).await.unwrap();
        let second = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });
        sink.emit(&keyed("after")).await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
        assert!(line.starts_with("<14>1 "));
        assert!(line.ends_with(r#"k="after""#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tcp_concurrent_emits_keep_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sink = Arc::new(SyslogSink::new(
            SyslogOptions::new()
                .with_address("127.0.0.1", port)
                .with_transport(SyslogTransport::Tcp),
        ));

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut received = Vec::new();
            for _ in 0..200 {
                received.push(lines.next_line().await.unwrap().unwrap());
            }
            received
        });

        let mut tasks = JoinSet::new();
        for i in 0..200 {
            let sink = Arc::clone(&sink);
            tasks.spawn(async move { sink.emit(&keyed(&format!("key{i}"))).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let received = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        let mut seen = HashSet::new();
        for line in &received {
            assert!(line.starts_with("<14>1 "), "torn line: {line:?}");
            let (_, key) = line
                .rsplit_once(" - k=\"")
                .unwrap_or_else(|| panic!("torn line: {line:?}"));
            let key = key.strip_suffix('"').unwrap();
            assert!(!key.contains('"'), "interleaved line: {line:?}");
            seen.insert(key.to_string());
        }
        let expected: HashSet<String> = (0..200).map(|i| format!("key{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_tcp_unreachable_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sink = SyslogSink::new(
            SyslogOptions::new()
                .with_address("127.0.0.1", port)
                .with_transport(SyslogTransport::Tcp),
        );

        let err = sink.emit(&event()).await.unwrap_err();
        assert!(matches!(err, Error::Syslog(_)));
    }
}

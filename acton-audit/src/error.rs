//! Error types for audit configuration and sink I/O

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the audit layer
///
/// None of these ever reach an HTTP caller: sink errors are logged and the
/// event is dropped for that sink only.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Invalid sink or control settings
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error (file sink writes, socket sends)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Syslog endpoint error
    #[error("Syslog error: {0}")]
    Syslog(String),

    /// Tracing subscriber could not be installed
    #[error("Tracing error: {0}")]
    Tracing(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

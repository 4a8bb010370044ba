//! Rotating log file sink
//!
//! Appends one line per event to `{directory}/{filename}`. When a write
//! would bring the file to `max_bytes` or beyond, the file is rotated with numbered
//! backups (`audit.log.1` is the newest, `audit.log.{backup_count}` the
//! oldest). Setting either bound to 0 disables rotation.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::AuditSink;
use crate::control::AuditControl;
use crate::error::{Error, Result};
use crate::event::AuditEvent;

/// Default sink name
pub const DEFAULT_NAME: &str = "rotating_file";

/// Options for [`RotatingFileSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatingFileOptions {
    /// Sink name (default: `rotating_file`)
    pub name: String,

    /// Default audit control
    pub control: AuditControl,

    /// Directory holding the log file, created if missing (default: `log`)
    pub directory: PathBuf,

    /// Log file name (default: `audit.log`)
    pub filename: String,

    /// Size bound in bytes before rotating (default: 10 MiB, 0 = unbounded)
    pub max_bytes: u64,

    /// Number of backups kept (default: 10, 0 = never rotate)
    pub backup_count: u32,

    /// Prefix each line with an RFC 3339 UTC timestamp (default: false)
    pub timestamp: bool,
}

impl Default for RotatingFileOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            control: AuditControl::default(),
            directory: PathBuf::from("log"),
            filename: "audit.log".to_string(),
            max_bytes: 10_485_760,
            backup_count: 10,
            timestamp: false,
        }
    }
}

impl RotatingFileOptions {
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

    /// Set the log directory
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Set the log file name
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the rotation bounds
    pub fn with_rotation(mut self, max_bytes: u64, backup_count: u32) -> Self {
        self.max_bytes = max_bytes;
        self.backup_count = backup_count;
        self
    }

    /// Enable or disable the timestamp prefix
    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Audit sink writing to a size-rotated log file
#[derive(Debug)]
pub struct RotatingFileSink {
    name: String,
    control: AuditControl,
    timestamp: bool,
    writer: Arc<Mutex<RotatingWriter>>,
}

impl RotatingFileSink {
    /// Create the sink, creating the log directory and opening the file
    pub fn new(options: RotatingFileOptions) -> Result<Self> {
        let path = options.directory.join(&options.filename);
        let writer = RotatingWriter::open(path, options.max_bytes, options.backup_count)?;

        tracing::info!(
            sink = %options.name,
            path = %writer.path.display(),
            max_bytes = options.max_bytes,
            backup_count = options.backup_count,
            "Rotating file audit sink initialized"
        );

        Ok(Self {
            name: options.name,
            control: options.control,
            timestamp: options.timestamp,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Path of the active log file
    pub fn path(&self) -> PathBuf {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .clone()
    }

    fn format_line(&self, event: &AuditEvent) -> String {
        if self.timestamp {
            format!(
                "{} - {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                event.to_line()
            )
        } else {
            event.to_line()
        }
    }
}

#[async_trait]
impl AuditSink for RotatingFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_control(&self) -> &AuditControl {
        &self.control
    }

    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let line = self.format_line(event);
        let writer = Arc::clone(&self.writer);

        // File writes and renames block; keep them off the async workers
        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_line(&line)
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))??;
        Ok(())
    }
}

/// Append-only file handle with numbered-backup rotation
#[derive(Debug)]
struct RotatingWriter {
    path: PathBuf,
    file: Option<File>,
    size: u64,
    max_bytes: u64,
    backup_count: u32,
}

impl RotatingWriter {
    fn open(path: PathBuf, max_bytes: u64, backup_count: u32) -> io::Result<Self> {
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file: Some(file),
            size,
            max_bytes,
            backup_count,
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let len = line.len() as u64 + 1;

        if self.should_rotate(len) {
            if let Err(e) = self.rotate() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to rotate audit log");
            }
        }

        let mut file = match self.file.take() {
            Some(file) => file,
            None => {
                let file = open_append(&self.path)?;
                self.size = file.metadata()?.len();
                file
            }
        };

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())?;
        file.flush()?;

        self.size += len;
        self.file = Some(file);
        Ok(())
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.size > 0
            && self.size + incoming >= self.max_bytes
    }

    /// Shift `path.N-1 → path.N` … `path → path.1`, dropping the oldest
    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        for i in (1..self.backup_count).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                let to = self.backup_path(i + 1);
                if to.exists() {
                    fs::remove_file(&to)?;
                }
                fs::rename(&from, &to)?;
            }
        }

        let first = self.backup_path(1);
        if first.exists() {
            fs::remove_file(&first)?;
        }
        fs::rename(&self.path, &first)?;

        let file = open_append(&self.path)?;
        self.size = 0;
        self.file = Some(file);

        tracing::debug!(path = %self.path.display(), "Rotated audit log");
        Ok(())
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

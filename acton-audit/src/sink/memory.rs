//! Bounded in-process sink
//!
//! Keeps the most recent events in memory. Useful as a stand-in for custom
//! sinks and for asserting on audit output in tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::AuditSink;
use crate::control::AuditControl;
use crate::error::Result;
use crate::event::AuditEvent;

/// Default number of retained events
pub const DEFAULT_CAPACITY: usize = 1024;

/// Sink that retains the last `capacity` events
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    control: AuditControl,
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemorySink {
    /// Create a memory sink with the default capacity
    pub fn new(name: impl Into<String>, control: AuditControl) -> Self {
        Self::with_capacity(name, control, DEFAULT_CAPACITY)
    }

    /// Create a memory sink retaining at most `capacity` events
    pub fn with_capacity(name: impl Into<String>, control: AuditControl, capacity: usize) -> Self {
        Self {
            name: name.into(),
            control,
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of the retained events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop all retained events
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_control(&self) -> &AuditControl {
        &self.control
    }

    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: i64) -> AuditEvent {
        [("n".to_string(), json!(n))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new("db", AuditControl::new());
        sink.emit(&event(1)).await.unwrap();
        sink.emit(&event(2)).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("n"), Some(&json!(1)));
        assert_eq!(events[1].get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_memory_sink_capacity() {
        let sink = MemorySink::with_capacity("db", AuditControl::new(), 2);
        for n in 0..5 {
            sink.emit(&event(n)).await.unwrap();
        }

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("n"), Some(&json!(3)));

        sink.clear();
        assert!(sink.events().is_empty());
    }
}

//! Index log capture.
//!
//! A `tracing` layer that keeps the most recent INFO/WARN/ERROR events of this crate in
//! a bounded ring so operators can read them back (`GET /logs`, `show-logs`) without a
//! file or database sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::executor::types::now_ms;

const CRATE_TARGET: &str = "catalog_search";
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at_ms: u64,
    pub level: String,
    pub scope: String,
    pub message: String,
}

pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        })
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layer(self: &Arc<Self>) -> CaptureLayer {
        CaptureLayer {
            buffer: self.clone(),
        }
    }
}

pub struct CaptureLayer {
    buffer: Arc<LogBuffer>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Levels compare by verbosity: DEBUG and TRACE are "greater" than INFO.
        if *meta.level() > Level::INFO || !meta.target().starts_with(CRATE_TARGET) {
            return;
        }

        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        let scope = visitor.scope.unwrap_or_else(|| {
            meta.target()
                .rsplit("::")
                .next()
                .unwrap_or(CRATE_TARGET)
                .to_string()
        });
        let mut message = visitor.message.unwrap_or_default();
        if !visitor.fields.is_empty() {
            message = format!("{} ({})", message, visitor.fields.join(", "));
        }

        self.buffer.push(LogEntry {
            at_ms: now_ms(),
            level: meta.level().to_string(),
            scope,
            message,
        });
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: Option<String>,
    scope: Option<String>,
    fields: Vec<String>,
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "scope" => self.scope = Some(value.to_string()),
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            "scope" => self.scope = Some(format!("{:?}", value).trim_matches('"').to_string()),
            name => self.fields.push(format!("{}={:?}", name, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_ring_drops_oldest() {
        let buffer = LogBuffer::new(2);
        for i in 0..3 {
            buffer.push(LogEntry {
                at_ms: i,
                level: "INFO".into(),
                scope: "test".into(),
                message: format!("entry {}", i),
            });
        }
        let recent = buffer.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "entry 1");
        assert_eq!(buffer.recent(1)[0].message, "entry 2");
    }

    #[test]
    fn test_layer_captures_scope_and_message() {
        let buffer = LogBuffer::new(10);
        let subscriber = tracing_subscriber::registry().with(buffer.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(scope = "runner", items = 3, "batch left unfinished");
            tracing::debug!(scope = "runner", "ignored");
        });

        let entries = buffer.recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "WARN");
        assert_eq!(entries[0].scope, "runner");
        assert_eq!(entries[0].message, "batch left unfinished (items=3)");
    }
}

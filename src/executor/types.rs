use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A persisted slice of a runner's work queue.
///
/// Items are opaque task payloads processed in insertion order. The batch is
/// rewritten as items finish and deleted once it is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBatch {
    pub key: String,
    pub items: Vec<Value>,
}

/// Request options for an out-of-band runner invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    /// `None` means fire-and-forget.
    pub timeout: Option<Duration>,
    /// Wait for the invocation's response before returning.
    pub blocking: bool,
    /// Cookie header forwarded with loopback requests.
    pub cookies: String,
}

/// Cookie headers above this size are dropped on relaxed re-dispatch.
pub const MAX_COOKIE_BYTES: usize = 4096;

impl DispatchOptions {
    pub fn new(cookies: &str) -> Self {
        Self {
            timeout: Some(Duration::from_millis(500)),
            blocking: false,
            cookies: cookies.to_string(),
        }
    }

    /// Options for the second attempt after an unconfirmed dispatch: no timeout,
    /// non-blocking, oversized cookies trimmed.
    pub fn relaxed(&self) -> Self {
        let cookies = self
            .cookies
            .split(';')
            .map(str::trim)
            .filter(|cookie| !cookie.is_empty())
            .scan(0usize, |size, cookie| {
                *size += cookie.len() + 2;
                Some((*size, cookie))
            })
            .take_while(|(size, _)| *size <= MAX_COOKIE_BYTES)
            .map(|(_, cookie)| cookie)
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            timeout: None,
            blocking: false,
            cookies,
        }
    }
}

/// Result of a single `handle()` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleOutcome {
    /// Another invocation holds the run lock.
    Locked,
    /// Nothing was queued.
    Idle,
    /// The budget ran out with work left. A new invocation was dispatched.
    Suspended { processed: usize },
    /// The queue drained and `complete()` ran.
    Completed { processed: usize },
}

/// Point-in-time view of a runner, for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub id: String,
    pub queued_batches: usize,
    pub queued_items: usize,
    pub running: bool,
    pub healthcheck_scheduled: bool,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

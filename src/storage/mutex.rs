//! Named advisory locks with an expiry.
//!
//! A lock that outlives its TTL is considered abandoned (its holder crashed or stalled)
//! and the next acquirer takes it over.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::executor::types::now_ms;

const ACQUIRE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    pub owner_token: String,
    /// Timestamp (ms) after which the lock may be taken over.
    pub expires_at: u64,
}

pub struct NamedMutex {
    locks: DashMap<String, Lock>,
    default_ttl: Duration,
}

impl NamedMutex {
    pub fn new(default_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            locks: DashMap::new(),
            default_ttl,
        })
    }

    /// Takes the lock if it is free or expired. Returns the owner token on success.
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> Option<String> {
        let now = now_ms();
        let token = uuid::Uuid::new_v4().to_string();
        let lock = Lock {
            name: name.to_string(),
            owner_token: token.clone(),
            expires_at: now + ttl.as_millis() as u64,
        };

        match self.locks.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(lock);
                Some(token)
            }
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    tracing::warn!(scope = "mutex", "Taking over expired lock '{}'", name);
                    entry.insert(lock);
                    Some(token)
                } else {
                    None
                }
            }
        }
    }

    /// Waits up to `timeout` for the lock. Returns `false` on contention.
    pub async fn acquire(&self, name: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(name, self.default_ttl).is_some() {
                tracing::trace!(scope = "mutex", "Acquired lock '{}'", name);
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(scope = "mutex", "Timed out waiting for lock '{}'", name);
                return false;
            }
            tokio::time::sleep(ACQUIRE_POLL.min(deadline - now)).await;
        }
    }

    pub fn release(&self, name: &str) {
        self.locks.remove(name);
    }

    /// Releases only if `token` still owns the lock (it may have expired and been taken over).
    pub fn release_owned(&self, name: &str, token: &str) -> bool {
        self.locks
            .remove_if(name, |_, lock| lock.owner_token == token)
            .is_some()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.expires_at > now_ms())
            .unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<Lock> {
        self.locks.get(name).map(|lock| lock.clone())
    }
}

//! Batch Queue
//!
//! A runner's work queue, stored as batches in the `OptionStore` under the key
//! prefix `{runner_id}_batch_`. Several batches can coexist; the oldest is always
//! processed first.

use super::types::*;
use crate::storage::options::OptionStore;

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// What sits at the head of the queue.
#[derive(Debug)]
pub enum BatchHead {
    Batch(QueueBatch),
    /// A stored entry that does not parse as a batch. Carries its key.
    Corrupt(String),
}

pub struct BatchQueue {
    store: Arc<OptionStore>,
    prefix: String,
}

impl BatchQueue {
    pub fn new(store: Arc<OptionStore>, runner_id: &str) -> Self {
        Self {
            store,
            prefix: format!("{}_batch_", runner_id),
        }
    }

    /// Persists `items` as a new batch. Empty input stores nothing.
    pub fn save(&self, items: Vec<Value>) -> Result<Option<String>> {
        if items.is_empty() {
            return Ok(None);
        }
        let key = format!("{}{}", self.prefix, uuid::Uuid::new_v4().simple());
        let batch = QueueBatch {
            key: key.clone(),
            items,
        };
        self.store.put(&key, &batch)?;
        tracing::debug!(
            scope = "runner",
            "Saved batch {} ({} items)",
            key,
            batch.items.len()
        );
        Ok(Some(key))
    }

    pub fn oldest(&self) -> Option<BatchHead> {
        let (key, value) = self.store.first_with_prefix(&self.prefix)?;
        match serde_json::from_value::<QueueBatch>(value) {
            Ok(mut batch) => {
                batch.key = key;
                Some(BatchHead::Batch(batch))
            }
            Err(_) => Some(BatchHead::Corrupt(key)),
        }
    }

    /// Rewrites a batch's remaining items in place (keeping its queue position).
    pub fn update(&self, batch: &QueueBatch) -> Result<()> {
        self.store.put(&batch.key, batch)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn is_empty(&self) -> bool {
        !self.store.has_prefix(&self.prefix)
    }

    pub fn batch_count(&self) -> usize {
        self.store.keys_with_prefix(&self.prefix).len()
    }

    pub fn item_count(&self) -> usize {
        self.store
            .keys_with_prefix(&self.prefix)
            .iter()
            .filter_map(|key| self.store.get::<QueueBatch>(key).ok().flatten())
            .map(|batch| batch.items.len())
            .sum()
    }
}

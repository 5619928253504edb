use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key namespace of an option store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Keys private to one site.
    Site(u64),
    /// Keys shared by every site of a network.
    Network,
}

impl Scope {
    fn prefix(&self) -> String {
        match self {
            Scope::Site(id) => format!("site_{}/", id),
            Scope::Network => "network/".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct OptionEntry {
    /// Insertion sequence, never reused. Orders entries sharing a prefix.
    id: u64,
    value: Value,
}

/// Persisted key-value options, the state behind build info and queue batches.
pub struct OptionStore {
    local_data: DashMap<String, OptionEntry>,
    next_id: AtomicU64,
    prefix: String,
}

impl OptionStore {
    pub fn new(scope: Scope) -> Arc<Self> {
        Arc::new(Self {
            local_data: DashMap::new(),
            next_id: AtomicU64::new(1),
            prefix: scope.prefix(),
        })
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.local_data
            .get(&self.scoped(key))
            .map(|entry| entry.value.clone())
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        match self.get_raw(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Inserts or overwrites. An overwritten entry keeps its position in prefix order.
    pub fn put<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let value = serde_json::to_value(value)?;
        match self.local_data.entry(self.scoped(key)) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().value = value;
            }
            Entry::Vacant(entry) => {
                entry.insert(OptionEntry {
                    id: self.next_id(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn put_raw(&self, key: &str, value: Value) {
        match self.local_data.entry(self.scoped(key)) {
            Entry::Occupied(mut entry) => entry.get_mut().value = value,
            Entry::Vacant(entry) => {
                entry.insert(OptionEntry {
                    id: self.next_id(),
                    value,
                });
            }
        }
    }

    /// Read-modify-write under the entry's shard lock.
    ///
    /// Returns the updated value, or `None` if the key does not exist.
    /// `f` must not touch the store.
    pub fn update<V, F>(&self, key: &str, f: F) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(&mut V),
    {
        let Some(mut entry) = self.local_data.get_mut(&self.scoped(key)) else {
            return Ok(None);
        };
        let mut current: V = serde_json::from_value(entry.value.clone())?;
        f(&mut current);
        entry.value = serde_json::to_value(&current)?;
        Ok(Some(current))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.local_data.remove(&self.scoped(key)).is_some()
    }

    /// Unscoped keys starting with `prefix`, oldest first.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let scoped_prefix = self.scoped(prefix);
        let mut keys: Vec<(u64, String)> = self
            .local_data
            .iter()
            .filter(|entry| entry.key().starts_with(&scoped_prefix))
            .map(|entry| {
                (
                    entry.value().id,
                    entry.key()[self.prefix.len()..].to_string(),
                )
            })
            .collect();
        keys.sort_by_key(|(id, _)| *id);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// The oldest entry whose key starts with `prefix`.
    pub fn first_with_prefix(&self, prefix: &str) -> Option<(String, Value)> {
        let scoped_prefix = self.scoped(prefix);
        self.local_data
            .iter()
            .filter(|entry| entry.key().starts_with(&scoped_prefix))
            .min_by_key(|entry| entry.value().id)
            .map(|entry| {
                (
                    entry.key()[self.prefix.len()..].to_string(),
                    entry.value().value.clone(),
                )
            })
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        let scoped_prefix = self.scoped(prefix);
        self.local_data
            .iter()
            .any(|entry| entry.key().starts_with(&scoped_prefix))
    }

    pub fn len(&self) -> usize {
        self.local_data
            .iter()
            .filter(|entry| entry.key().starts_with(&self.prefix))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

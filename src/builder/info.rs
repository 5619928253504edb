//! Build info persistence, one record per role under `build_info_{role}`.

use super::types::*;
use crate::storage::options::OptionStore;
use crate::storage::types::IndexRole;

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

pub struct BuildInfoStore {
    store: Arc<OptionStore>,
}

impl BuildInfoStore {
    pub fn new(store: Arc<OptionStore>) -> Self {
        Self { store }
    }

    fn key(role: IndexRole) -> String {
        format!("build_info_{}", role)
    }

    pub fn get(&self, role: IndexRole) -> Option<BuildInfo> {
        match self.store.get::<BuildInfo>(&Self::key(role)) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(scope = "builder", "Unreadable build info for {}: {}", role, e);
                None
            }
        }
    }

    pub fn put(&self, info: &BuildInfo) -> Result<()> {
        self.store.put(&Self::key(info.role), info)
    }

    /// Atomic read-modify-write. Totals are refreshed after `f` runs.
    pub fn update<F>(&self, role: IndexRole, f: F) -> Result<Option<BuildInfo>>
    where
        F: FnOnce(&mut BuildInfo),
    {
        self.store.update(&Self::key(role), |info: &mut BuildInfo| {
            f(info);
            info.refresh_totals();
        })
    }

    pub fn delete(&self, role: IndexRole) -> bool {
        self.store.delete(&Self::key(role))
    }

    pub fn status(&self, role: IndexRole) -> Option<BuildStatus> {
        self.get(role).map(|info| info.status)
    }

    /// A named field of the record, or a value stored with `add_value`.
    pub fn get_value(&self, role: IndexRole, key: &str) -> Option<Value> {
        let info = self.get(role)?;
        if let Some(value) = info.extra.get(key) {
            return Some(value.clone());
        }
        serde_json::to_value(&info).ok()?.get(key).cloned()
    }

    pub fn add_value(&self, role: IndexRole, key: &str, value: Value) -> Result<bool> {
        let updated = self.update(role, |info| {
            info.extra.insert(key.to_string(), value);
        })?;
        Ok(updated.is_some())
    }

    /// Re-homes the `from` record under `to` (after a role swap).
    pub fn move_role(&self, from: IndexRole, to: IndexRole) -> Result<Option<BuildInfo>> {
        let Some(mut info) = self.get(from) else {
            return Ok(None);
        };
        info.role = to;
        self.put(&info)?;
        self.delete(from);
        Ok(Some(info))
    }
}

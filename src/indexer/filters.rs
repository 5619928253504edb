//! Ordered transformation chains.
//!
//! Integrations register filters at startup; the chain applies them in registration
//! order. Used on readable snapshots before they are stored and on suggestions
//! before they are sent.

use std::sync::Arc;

pub trait Filter<T>: Send + Sync {
    fn apply(&self, value: T) -> T;
}

impl<T, F> Filter<T> for F
where
    F: Fn(T) -> T + Send + Sync,
{
    fn apply(&self, value: T) -> T {
        self(value)
    }
}

pub struct FilterChain<T> {
    filters: Vec<(String, Arc<dyn Filter<T>>)>,
}

impl<T> Default for FilterChain<T> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

impl<T> Clone for FilterChain<T> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
        }
    }
}

impl<T> FilterChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, filter: impl Filter<T> + 'static) {
        self.filters.push((name.to_string(), Arc::new(filter)));
        tracing::debug!(scope = "indexer", "Registered filter: {}", name);
    }

    pub fn apply(&self, value: T) -> T {
        self.filters
            .iter()
            .fold(value, |value, (_, filter)| filter.apply(value))
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

//! Runner Registry
//!
//! Maps runner identifiers (e.g. "catalog_search_readable") to their `QueueRunner`.
//! Dispatchers, the healthcheck loop and the loopback endpoint resolve runners here,
//! so the runners themselves never need to know how they get invoked.

use super::runner::QueueRunner;
use super::types::*;

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct RunnerRegistry {
    runners: DashMap<String, Arc<QueueRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a runner under its own id, replacing any previous one.
    pub fn register(&self, runner: Arc<QueueRunner>) {
        let id = runner.id().to_string();
        self.runners.insert(id.clone(), runner);
        tracing::debug!(scope = "runner", "Registered runner: {}", id);
    }

    pub fn get(&self, runner_id: &str) -> Option<Arc<QueueRunner>> {
        self.runners.get(runner_id).map(|entry| entry.value().clone())
    }

    /// Runs one invocation of `runner_id`. `None` if no such runner is registered.
    pub async fn handle(&self, runner_id: &str) -> Option<HandleOutcome> {
        let runner = self.get(runner_id)?;
        Some(runner.handle().await)
    }

    /// All runners, sorted by id.
    pub fn runners(&self) -> Vec<Arc<QueueRunner>> {
        let mut runners: Vec<Arc<QueueRunner>> = self
            .runners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        runners.sort_by(|a, b| a.id().cmp(b.id()));
        runners
    }

    pub fn list_runners(&self) -> Vec<String> {
        self.runners().iter().map(|r| r.id().to_string()).collect()
    }

    pub fn statuses(&self) -> Vec<RunnerStatus> {
        self.runners().iter().map(|r| r.status()).collect()
    }

    pub fn has_runner(&self, runner_id: &str) -> bool {
        self.runners.contains_key(runner_id)
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }
}

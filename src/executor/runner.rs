//! Queue Runner
//!
//! Executes a list of task items across many short invocations. Each `handle()` call
//! works through the queued batches until its time/memory budget runs out, persists
//! what is left, and dispatches the next invocation. A scheduled healthcheck re-runs
//! the runner if a dispatch is lost.
//!
//! ## Invocation lifecycle
//! 1. **Lock**: take the run lock or return `Locked` immediately.
//! 2. **Work**: process the oldest batch item by item, replacing items that return a
//!    continuation and dropping the rest.
//! 3. **Checkpoint**: rewrite or delete the batch, stop when the budget is spent.
//! 4. **Hand-off**: release the lock, then `dispatch()` if work remains or `complete()`.

use super::queue::{BatchHead, BatchQueue};
use super::types::*;
use crate::config::RunnerSettings;
use crate::storage::mutex::NamedMutex;
use crate::storage::options::OptionStore;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The work a runner performs, supplied by each sub-indexer.
#[async_trait]
pub trait QueueTask: Send + Sync {
    /// Processes one item. `Some(next)` keeps `next` queued in place of the item
    /// (partial progress), `None` drops it. Must be safe to re-run.
    async fn task(&self, item: Value) -> Result<Option<Value>>;

    /// Completion bookkeeping, run once the queue drains.
    async fn complete(&self) {}
}

/// Triggers an out-of-band `handle()` of a runner.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, runner_id: &str, options: &DispatchOptions) -> Result<()>;
}

/// Shared collaborators every runner needs.
#[derive(Clone)]
pub struct RunnerContext {
    pub store: Arc<OptionStore>,
    pub mutex: Arc<NamedMutex>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub settings: RunnerSettings,
    pub cookies: String,
}

/// Per-invocation limits. Exceeding any of them ends the invocation.
#[derive(Debug, Clone)]
pub struct RunnerBudget {
    pub time_limit: Duration,
    /// Bytes of resident memory. The runner stops at 90% of it.
    pub memory_limit: Option<u64>,
    pub max_items: Option<usize>,
}

impl RunnerBudget {
    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self {
            time_limit: Duration::from_secs(settings.time_limit_secs),
            memory_limit: (settings.memory_limit_mb > 0)
                .then(|| settings.memory_limit_mb * 1024 * 1024),
            max_items: settings.max_items_per_invocation,
        }
    }

    pub fn exceeded(&self, started: Instant, processed: usize) -> bool {
        if self.max_items.is_some_and(|max| processed >= max) {
            return true;
        }
        if started.elapsed() >= self.time_limit {
            return true;
        }
        match (self.memory_limit, process_memory_bytes()) {
            (Some(limit), Some(used)) => used >= limit / 10 * 9,
            _ => false,
        }
    }
}

/// Resident set size of this process (Linux only).
fn process_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let rss_pages = statm.split_whitespace().nth(1)?.parse::<u64>().ok()?;
        Some(rss_pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HealthcheckSchedule {
    interval_ms: u64,
    next_run_ms: u64,
}

pub struct QueueRunner {
    id: String,
    task: Arc<dyn QueueTask>,
    queue: BatchQueue,
    ctx: RunnerContext,
    budget: RunnerBudget,
    /// Items pushed but not yet saved as a batch.
    buffer: Mutex<Vec<Value>>,
}

impl QueueRunner {
    pub fn new(id: &str, task: Arc<dyn QueueTask>, ctx: RunnerContext) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            task,
            queue: BatchQueue::new(ctx.store.clone(), id),
            budget: RunnerBudget::from_settings(&ctx.settings),
            ctx,
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock_name(&self) -> String {
        format!("{}_process_lock", self.id)
    }

    fn healthcheck_key(&self) -> String {
        format!("{}_healthcheck", self.id)
    }

    // --- Queue ---

    pub fn push(&self, items: impl IntoIterator<Item = Value>) {
        self.buffer.lock().extend(items);
    }

    /// Persists the push buffer as a new batch. No-op when nothing was pushed.
    pub fn save(&self) -> Result<Option<String>> {
        let items = std::mem::take(&mut *self.buffer.lock());
        self.queue.save(items)
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_process_running(&self) -> bool {
        self.ctx.mutex.is_locked(&self.lock_name())
    }

    pub fn status(&self) -> RunnerStatus {
        RunnerStatus {
            id: self.id.clone(),
            queued_batches: self.queue.batch_count(),
            queued_items: self.queue.item_count(),
            running: self.is_process_running(),
            healthcheck_scheduled: self.is_healthcheck_scheduled(),
        }
    }

    // --- Invocation ---

    /// One budget-limited invocation.
    pub async fn handle(&self) -> HandleOutcome {
        let lock_name = self.lock_name();
        let Some(token) = self
            .ctx
            .mutex
            .try_acquire(&lock_name, self.ctx.settings.lock_ttl())
        else {
            tracing::debug!(scope = "runner", "Runner {} already running, skipping", self.id);
            return HandleOutcome::Locked;
        };

        if self.queue.is_empty() {
            self.ctx.mutex.release_owned(&lock_name, &token);
            return HandleOutcome::Idle;
        }

        let started = Instant::now();
        let mut processed = 0usize;
        let mut exhausted = false;

        while !exhausted {
            let mut batch = match self.queue.oldest() {
                Some(BatchHead::Batch(batch)) => batch,
                Some(BatchHead::Corrupt(key)) => {
                    tracing::warn!(scope = "runner", "Dropping unreadable batch {} of runner {}", key, self.id);
                    self.queue.delete(&key);
                    continue;
                }
                None => break,
            };

            let mut remaining = Vec::with_capacity(batch.items.len());
            let mut items = std::mem::take(&mut batch.items).into_iter();
            for item in items.by_ref() {
                match self.task.task(item).await {
                    Ok(Some(next)) => remaining.push(next),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(scope = "runner", "Task of runner {} failed: {:#}", self.id, e);
                    }
                }
                processed += 1;
                if self.budget.exceeded(started, processed) {
                    exhausted = true;
                    break;
                }
            }
            remaining.extend(items);

            if remaining.is_empty() {
                self.queue.delete(&batch.key);
            } else {
                batch.items = remaining;
                if let Err(e) = self.queue.update(&batch) {
                    tracing::warn!(scope = "runner", "Failed to checkpoint batch {}: {}", batch.key, e);
                }
            }
        }

        self.ctx.mutex.release_owned(&lock_name, &token);

        if self.queue.is_empty() {
            self.complete().await;
            HandleOutcome::Completed { processed }
        } else {
            tracing::debug!(
                scope = "runner",
                "Runner {} suspended after {} items in {:?}",
                self.id,
                processed,
                started.elapsed()
            );
            self.dispatch().await;
            HandleOutcome::Suspended { processed }
        }
    }

    /// Triggers the next invocation and schedules the healthcheck backstop.
    ///
    /// The dispatch is confirmed by polling. If the queue is still full and no
    /// invocation started, one more attempt goes out with relaxed options.
    pub async fn dispatch(&self) {
        let options = DispatchOptions::new(&self.ctx.cookies);
        if let Err(e) = self.ctx.dispatcher.dispatch(&self.id, &options).await {
            tracing::warn!(scope = "runner", "Dispatch of runner {} failed: {:#}", self.id, e);
        }
        self.schedule_healthcheck();

        let attempts = self.ctx.settings.dispatch_poll_attempts;
        if attempts == 0 {
            return;
        }

        let mut delay = Duration::from_millis(self.ctx.settings.dispatch_poll_delay_ms);
        for _ in 0..attempts {
            tokio::time::sleep(delay).await;
            if self.is_process_running() || self.is_queue_empty() {
                tracing::trace!(scope = "runner", "Dispatch of runner {} confirmed", self.id);
                return;
            }
            delay *= 2;
        }

        if self.is_queue_empty() || self.is_process_running() {
            return;
        }

        match self
            .ctx
            .dispatcher
            .dispatch(&self.id, &options.relaxed())
            .await
        {
            Ok(()) => tracing::info!(
                scope = "runner",
                "Runner {} did not start, re-dispatched with relaxed options",
                self.id
            ),
            Err(e) => tracing::warn!(
                scope = "runner",
                "Re-dispatch of runner {} failed, waiting for healthcheck: {:#}",
                self.id,
                e
            ),
        }
    }

    /// Clears the healthcheck and runs the task's completion bookkeeping.
    pub async fn complete(&self) {
        self.clear_healthcheck();
        tracing::info!(scope = "runner", "Runner {} completed its queue", self.id);
        self.task.complete().await;
    }

    /// Drops the oldest batch, unschedules the healthcheck and frees the run lock.
    pub fn cancel(&self) -> bool {
        let deleted = match self.queue.oldest() {
            Some(BatchHead::Batch(batch)) => self.queue.delete(&batch.key),
            Some(BatchHead::Corrupt(key)) => self.queue.delete(&key),
            None => false,
        };
        self.clear_healthcheck();
        self.ctx.mutex.release(&self.lock_name());
        self.buffer.lock().clear();
        deleted
    }

    // --- Healthcheck schedule ---

    pub fn schedule_healthcheck(&self) {
        let interval_ms = self.ctx.settings.healthcheck_interval().as_millis() as u64;
        let schedule = HealthcheckSchedule {
            interval_ms,
            next_run_ms: now_ms() + interval_ms,
        };
        if let Err(e) = self.ctx.store.put(&self.healthcheck_key(), &schedule) {
            tracing::warn!(scope = "runner", "Failed to schedule healthcheck of {}: {}", self.id, e);
        }
    }

    pub fn clear_healthcheck(&self) {
        self.ctx.store.delete(&self.healthcheck_key());
    }

    pub fn is_healthcheck_scheduled(&self) -> bool {
        self.ctx.store.get_raw(&self.healthcheck_key()).is_some()
    }

    /// Returns `true` and pushes the next run back when the healthcheck is due at `now`.
    pub fn take_due_healthcheck(&self, now: u64) -> bool {
        let mut due = false;
        let updated = self
            .ctx
            .store
            .update::<HealthcheckSchedule, _>(&self.healthcheck_key(), |schedule| {
                if schedule.next_run_ms <= now {
                    schedule.next_run_ms = now + schedule.interval_ms;
                    due = true;
                }
            });
        if let Err(e) = updated {
            tracing::warn!(scope = "runner", "Unreadable healthcheck schedule of {}: {}", self.id, e);
            return false;
        }
        due
    }
}

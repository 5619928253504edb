//! Executor Module Tests
//!
//! ## Test Scopes
//! - **Runner**: batching, budget checkpoints, continuations, locking, completion.
//! - **Dispatch**: confirmation polling, relaxed re-dispatch, in-process spawn.
//! - **Healthcheck**: stalled runners are resumed, drained runners are unscheduled.
//! - **Registry**: lookup and listing.

#[cfg(test)]
mod tests {
    use crate::config::RunnerSettings;
    use crate::executor::dispatcher::SpawnDispatcher;
    use crate::executor::healthcheck;
    use crate::executor::registry::RunnerRegistry;
    use crate::executor::runner::{Dispatcher, QueueRunner, QueueTask, RunnerContext};
    use crate::executor::types::*;
    use crate::storage::mutex::NamedMutex;
    use crate::storage::options::{OptionStore, Scope};

    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Drops plain items, counts `steps` down, fails on `fail`.
    #[derive(Default)]
    struct CountingTask {
        calls: AtomicUsize,
        completed: AtomicUsize,
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl QueueTask for CountingTask {
        async fn task(&self, item: Value) -> Result<Option<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(item.clone());
            if item.get("fail").is_some() {
                return Err(anyhow::anyhow!("Intentional error"));
            }
            match item.get("steps").and_then(Value::as_u64) {
                Some(steps) if steps > 1 => Ok(Some(json!({ "steps": steps - 1 }))),
                _ => Ok(None),
            }
        }

        async fn complete(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records dispatches without starting anything.
    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<DispatchOptions>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, _runner_id: &str, options: &DispatchOptions) -> Result<()> {
            self.calls.lock().push(options.clone());
            Ok(())
        }
    }

    fn settings(max_items: Option<usize>) -> RunnerSettings {
        RunnerSettings {
            max_items_per_invocation: max_items,
            memory_limit_mb: 0,
            dispatch_poll_attempts: 0,
            ..Default::default()
        }
    }

    fn context(settings: RunnerSettings, dispatcher: Arc<dyn Dispatcher>) -> RunnerContext {
        RunnerContext {
            store: OptionStore::new(Scope::Site(1)),
            mutex: NamedMutex::new(Duration::from_secs(60)),
            dispatcher,
            settings,
            cookies: String::new(),
        }
    }

    fn runner_with(
        max_items: Option<usize>,
    ) -> (Arc<QueueRunner>, Arc<CountingTask>, Arc<RecordingDispatcher>) {
        let task = Arc::new(CountingTask::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let runner = QueueRunner::new(
            "test_runner",
            task.clone(),
            context(settings(max_items), dispatcher.clone()),
        );
        (runner, task, dispatcher)
    }

    // ============================================================
    // TEST 1: Queue persistence
    // ============================================================

    #[tokio::test]
    async fn test_save_without_push_is_noop() {
        let (runner, _, _) = runner_with(None);

        assert!(runner.save().unwrap().is_none());
        assert!(runner.is_queue_empty());
        assert_eq!(runner.handle().await, HandleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_items_processed_in_insertion_order() {
        // ARRANGE: Two batches
        let (runner, task, _) = runner_with(None);
        runner.push(vec![json!(1), json!(2)]);
        runner.save().unwrap();
        runner.push(vec![json!(3)]);
        runner.save().unwrap();

        // ACT
        let outcome = runner.handle().await;

        // ASSERT: Oldest batch first, in order
        assert_eq!(outcome, HandleOutcome::Completed { processed: 3 });
        assert_eq!(*task.seen.lock(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
    }

    // ============================================================
    // TEST 2: Budget-driven checkpointing
    // ============================================================

    #[tokio::test]
    async fn test_hundred_items_two_per_invocation() {
        // ARRANGE: 100 ids in batches of 20, budget of 2 items per invocation
        let (runner, task, dispatcher) = runner_with(Some(2));
        for chunk in (0..100).collect::<Vec<u64>>().chunks(20) {
            runner.push(chunk.iter().map(|id| json!({ "id": id })));
            runner.save().unwrap();
        }
        assert_eq!(runner.status().queued_batches, 5);

        // ACT: Simulate successive invocations
        let mut invocations = 0;
        while !runner.is_queue_empty() {
            invocations += 1;
            let outcome = runner.handle().await;
            assert!(invocations <= 100, "queue never drained");
            if runner.is_queue_empty() {
                assert_eq!(outcome, HandleOutcome::Completed { processed: 2 });
            } else {
                assert_eq!(outcome, HandleOutcome::Suspended { processed: 2 });
            }
        }

        // ASSERT
        assert!(invocations >= 50);
        assert_eq!(task.calls.load(Ordering::SeqCst), 100);
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.calls.lock().len(), invocations - 1);

        // Further invocations find nothing and never complete again
        assert_eq!(runner.handle().await, HandleOutcome::Idle);
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_continuation_replaces_item() {
        // ARRANGE: One item that needs three passes
        let (runner, task, _) = runner_with(Some(1));
        runner.push(vec![json!({ "steps": 3 }), json!("next")]);
        runner.save().unwrap();

        // ACT: First invocation stops after one pass
        let outcome = runner.handle().await;

        // ASSERT: Continuation stays at the head of the batch
        assert_eq!(outcome, HandleOutcome::Suspended { processed: 1 });
        assert_eq!(runner.status().queued_items, 2);

        runner.handle().await;
        runner.handle().await;
        let last = runner.handle().await;
        assert_eq!(last, HandleOutcome::Completed { processed: 1 });
        assert_eq!(
            *task.seen.lock(),
            vec![
                json!({ "steps": 3 }),
                json!({ "steps": 2 }),
                json!({ "steps": 1 }),
                json!("next")
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_task_drops_item_and_continues() {
        let (runner, task, _) = runner_with(None);
        runner.push(vec![json!({ "fail": true }), json!(2)]);
        runner.save().unwrap();

        let outcome = runner.handle().await;

        assert_eq!(outcome, HandleOutcome::Completed { processed: 2 });
        assert_eq!(task.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreadable_batch_is_dropped() {
        // ARRANGE: A stored value that is not a batch
        let task = Arc::new(CountingTask::default());
        let ctx = context(settings(None), Arc::new(RecordingDispatcher::default()));
        let store = ctx.store.clone();
        let runner = QueueRunner::new("test_runner", task.clone(), ctx);
        store.put_raw("test_runner_batch_corrupt", json!("not a batch"));
        assert!(!runner.is_queue_empty());

        // ACT
        let outcome = runner.handle().await;

        // ASSERT
        assert_eq!(outcome, HandleOutcome::Completed { processed: 0 });
        assert!(runner.is_queue_empty());
        assert_eq!(task.calls.load(Ordering::SeqCst), 0);
    }

    // ============================================================
    // TEST 3: Run lock
    // ============================================================

    #[tokio::test]
    async fn test_handle_fails_fast_when_locked() {
        // ARRANGE: Another invocation holds the lock
        let task = Arc::new(CountingTask::default());
        let ctx = context(settings(None), Arc::new(RecordingDispatcher::default()));
        let mutex = ctx.mutex.clone();
        let runner = QueueRunner::new("test_runner", task.clone(), ctx);
        runner.push(vec![json!(1)]);
        runner.save().unwrap();
        let token = mutex
            .try_acquire("test_runner_process_lock", Duration::from_secs(60))
            .unwrap();

        // ACT / ASSERT
        assert!(runner.is_process_running());
        assert_eq!(runner.handle().await, HandleOutcome::Locked);
        assert_eq!(task.calls.load(Ordering::SeqCst), 0);

        mutex.release_owned("test_runner_process_lock", &token);
        assert_eq!(
            runner.handle().await,
            HandleOutcome::Completed { processed: 1 }
        );
        assert!(!runner.is_process_running());
    }

    #[tokio::test]
    async fn test_expired_lock_does_not_block() {
        let task = Arc::new(CountingTask::default());
        let ctx = context(settings(None), Arc::new(RecordingDispatcher::default()));
        let mutex = ctx.mutex.clone();
        let runner = QueueRunner::new("test_runner", task, ctx);
        runner.push(vec![json!(1)]);
        runner.save().unwrap();

        // A crashed invocation left a lock that has already expired
        mutex.try_acquire("test_runner_process_lock", Duration::ZERO);

        assert_eq!(
            runner.handle().await,
            HandleOutcome::Completed { processed: 1 }
        );
    }

    // ============================================================
    // TEST 4: Dispatch
    // ============================================================

    #[tokio::test]
    async fn test_suspension_dispatches_and_schedules_healthcheck() {
        let (runner, _, dispatcher) = runner_with(Some(1));
        runner.push(vec![json!(1), json!(2)]);
        runner.save().unwrap();

        runner.handle().await;

        assert_eq!(dispatcher.calls.lock().len(), 1);
        assert!(runner.is_healthcheck_scheduled());

        runner.handle().await;
        assert!(!runner.is_healthcheck_scheduled(), "complete() clears the schedule");
    }

    #[tokio::test]
    async fn test_unconfirmed_dispatch_retries_relaxed() {
        // ARRANGE: A dispatcher that never starts anything, short poll window
        let task = Arc::new(CountingTask::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut runner_settings = settings(None);
        runner_settings.dispatch_poll_attempts = 2;
        runner_settings.dispatch_poll_delay_ms = 1;
        let mut ctx = context(runner_settings, dispatcher.clone());
        ctx.cookies = "session=abc".to_string();
        let runner = QueueRunner::new("test_runner", task, ctx);
        runner.push(vec![json!(1)]);
        runner.save().unwrap();

        // ACT
        runner.dispatch().await;

        // ASSERT: Default attempt, then one relaxed attempt
        let calls = dispatcher.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].timeout.is_some());
        assert_eq!(calls[1].timeout, None);
        assert!(!calls[1].blocking);
        assert_eq!(calls[1].cookies, "session=abc");
    }

    #[tokio::test]
    async fn test_confirmed_dispatch_does_not_retry() {
        let task = Arc::new(CountingTask::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut runner_settings = settings(None);
        runner_settings.dispatch_poll_attempts = 2;
        runner_settings.dispatch_poll_delay_ms = 1;
        let runner = QueueRunner::new("test_runner", task, context(runner_settings, dispatcher.clone()));

        // Empty queue counts as confirmed
        runner.dispatch().await;

        assert_eq!(dispatcher.calls.lock().len(), 1);
    }

    #[test]
    fn test_relaxed_options_trim_oversized_cookies() {
        let big = "x".repeat(MAX_COOKIE_BYTES);
        let options = DispatchOptions::new(&format!("a=1; b={}; c=3", big));

        let relaxed = options.relaxed();

        assert_eq!(relaxed.timeout, None);
        assert_eq!(relaxed.cookies, "a=1");
    }

    #[tokio::test]
    async fn test_spawn_dispatcher_drains_queue() {
        // ARRANGE: Runners re-invoke themselves on the local runtime
        let registry = RunnerRegistry::new();
        let dispatcher = Arc::new(SpawnDispatcher::new(Arc::downgrade(&registry)));
        let task = Arc::new(CountingTask::default());
        let runner = QueueRunner::new("spawned", task.clone(), context(settings(Some(3)), dispatcher));
        registry.register(runner.clone());
        runner.push((0..10).map(|i| json!(i)));
        runner.save().unwrap();

        // ACT
        runner.dispatch().await;
        for _ in 0..200 {
            if task.completed.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // ASSERT
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
        assert_eq!(task.calls.load(Ordering::SeqCst), 10);
        assert!(runner.is_queue_empty());
    }

    // ============================================================
    // TEST 5: Cancel
    // ============================================================

    #[tokio::test]
    async fn test_cancel_drops_oldest_batch_and_lock() {
        let task = Arc::new(CountingTask::default());
        let ctx = context(settings(None), Arc::new(RecordingDispatcher::default()));
        let mutex = ctx.mutex.clone();
        let runner = QueueRunner::new("test_runner", task.clone(), ctx);
        runner.push(vec![json!(1)]);
        runner.save().unwrap();
        runner.push(vec![json!(2)]);
        runner.save().unwrap();
        runner.schedule_healthcheck();
        mutex.try_acquire("test_runner_process_lock", Duration::from_secs(60));

        assert!(runner.cancel());

        assert!(!runner.is_process_running());
        assert!(!runner.is_healthcheck_scheduled());
        assert_eq!(runner.status().queued_batches, 1);

        runner.handle().await;
        assert_eq!(*task.seen.lock(), vec![json!(2)]);
        assert!(!runner.cancel());
    }

    // ============================================================
    // TEST 6: Healthcheck
    // ============================================================

    #[tokio::test]
    async fn test_healthcheck_resumes_stalled_runner() {
        // ARRANGE: A suspended runner whose dispatch was lost
        let registry = RunnerRegistry::new();
        let (runner, task, _) = runner_with(Some(2));
        registry.register(runner.clone());
        runner.push((0..4).map(|i| json!(i)));
        runner.save().unwrap();
        runner.handle().await;
        assert!(runner.is_healthcheck_scheduled());

        // ACT: Not due yet
        let early = healthcheck::tick(&registry, now_ms()).await;
        assert!(early.resumed.is_empty());

        // ACT: Due
        let report = healthcheck::tick(&registry, now_ms() + 3_600_000).await;

        // ASSERT
        assert_eq!(report.resumed, vec!["test_runner".to_string()]);
        assert_eq!(report.outcomes, vec![HandleOutcome::Completed { processed: 2 }]);
        assert_eq!(task.completed.load(Ordering::SeqCst), 1);
        assert!(!runner.is_healthcheck_scheduled());
    }

    #[tokio::test]
    async fn test_healthcheck_clears_drained_runner() {
        let registry = RunnerRegistry::new();
        let (runner, task, _) = runner_with(None);
        registry.register(runner.clone());
        runner.schedule_healthcheck();

        let report = healthcheck::tick(&registry, now_ms() + 3_600_000).await;

        assert_eq!(report.cleared, vec!["test_runner".to_string()]);
        assert!(!runner.is_healthcheck_scheduled());
        assert_eq!(task.completed.load(Ordering::SeqCst), 0);
    }

    // ============================================================
    // TEST 7: Registry
    // ============================================================

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = RunnerRegistry::new();
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        for id in ["b_runner", "a_runner"] {
            registry.register(QueueRunner::new(
                id,
                Arc::new(CountingTask::default()),
                context(settings(None), dispatcher.clone()),
            ));
        }

        assert_eq!(registry.runner_count(), 2);
        assert!(registry.has_runner("a_runner"));
        assert_eq!(registry.list_runners(), vec!["a_runner", "b_runner"]);
        assert_eq!(registry.handle("a_runner").await, Some(HandleOutcome::Idle));
        assert_eq!(registry.handle("missing").await, None);
    }
}

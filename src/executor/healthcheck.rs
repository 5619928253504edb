//! Healthcheck (reconciliation) loop.
//!
//! Every dispatch schedules a healthcheck for its runner. When one comes due, a runner
//! with queued work and no live invocation is re-run; a runner whose queue drained has
//! its schedule cleared. This is the backstop for lost dispatches and crashed workers.

use super::protocol::HealthcheckReport;
use super::registry::RunnerRegistry;
use super::types::now_ms;

use std::sync::Arc;
use std::time::Duration;

/// Reconciles every runner whose healthcheck is due at `now`.
pub async fn tick(registry: &RunnerRegistry, now: u64) -> HealthcheckReport {
    let mut report = HealthcheckReport::default();

    for runner in registry.runners() {
        if !runner.take_due_healthcheck(now) {
            continue;
        }

        if runner.is_queue_empty() {
            runner.clear_healthcheck();
            report.cleared.push(runner.id().to_string());
            continue;
        }
        if runner.is_process_running() {
            continue;
        }

        tracing::warn!(scope = "runner", "Runner {} stalled with queued work, resuming", runner.id());
        report.resumed.push(runner.id().to_string());
        report.outcomes.push(runner.handle().await);
    }

    report
}

/// Runs `tick` every `interval` until the process exits.
pub fn spawn_loop(registry: Arc<RunnerRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tracing::info!(scope = "runner", "Healthcheck loop every {:?}", interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = tick(&registry, now_ms()).await;
            if !report.resumed.is_empty() || !report.cleared.is_empty() {
                tracing::debug!(
                    scope = "runner",
                    "Healthcheck resumed {:?}, cleared {:?}",
                    report.resumed,
                    report.cleared
                );
            }
        }
    })
}

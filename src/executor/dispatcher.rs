//! Runner Dispatchers
//!
//! Two ways of starting a runner invocation out of band:
//! - **`SpawnDispatcher`**: spawns `handle()` on the local tokio runtime.
//! - **`LoopbackDispatcher`**: POSTs to this node's own dispatch endpoint, retrying
//!   connection failures with exponential backoff.

use super::protocol::runner_dispatch_path;
use super::registry::RunnerRegistry;
use super::runner::Dispatcher;
use super::types::*;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;

pub struct SpawnDispatcher {
    /// Weak so the registry (which owns the runners, which own this dispatcher) can drop.
    registry: Weak<RunnerRegistry>,
}

impl SpawnDispatcher {
    pub fn new(registry: Weak<RunnerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Dispatcher for SpawnDispatcher {
    async fn dispatch(&self, runner_id: &str, _options: &DispatchOptions) -> Result<()> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("Runner registry is gone"))?;
        let runner = registry
            .get(runner_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown runner: {}", runner_id))?;

        tokio::spawn(async move {
            let outcome = runner.handle().await;
            tracing::trace!(scope = "runner", "Spawned invocation of {} ended: {:?}", runner.id(), outcome);
        });
        Ok(())
    }
}

pub struct LoopbackDispatcher {
    http_client: reqwest::Client,
    base_url: String,
    attempts: usize,
}

impl LoopbackDispatcher {
    pub fn new(base_url: &str, attempts: usize) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            attempts: attempts.max(1),
        }
    }

    /// `Ok(None)` when a non-blocking request timed out after going out.
    async fn post_with_retry(
        &self,
        url: String,
        options: &DispatchOptions,
    ) -> Result<Option<reqwest::Response>> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let mut request = self.http_client.post(url.clone());
            if let Some(timeout) = options.timeout {
                request = request.timeout(timeout);
            }
            if !options.cookies.is_empty() {
                request = request.header(reqwest::header::COOKIE, options.cookies.clone());
            }

            match request.send().await {
                Ok(resp) => return Ok(Some(resp)),
                // A non-blocking dispatch only needs the request to go out
                Err(e) if e.is_timeout() && !options.blocking => {
                    tracing::trace!(scope = "runner", "Loopback request to {} timed out (non-blocking)", url);
                    return Ok(None);
                }
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl Dispatcher for LoopbackDispatcher {
    async fn dispatch(&self, runner_id: &str, options: &DispatchOptions) -> Result<()> {
        let url = format!("{}{}", self.base_url, runner_dispatch_path(runner_id));
        let Some(response) = self.post_with_retry(url, options).await? else {
            return Ok(());
        };

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Loopback dispatch of {} returned {}",
                runner_id,
                response.status()
            ));
        }

        tracing::debug!(scope = "runner", "Dispatched {} over loopback", runner_id);
        Ok(())
    }
}

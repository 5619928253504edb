//! Background Job Executor Module
//!
//! Runs long jobs (index builds) as a series of short, budget-limited invocations.
//!
//! ## Architecture Overview
//! 1. **Submission**: work is `push`ed into a `QueueRunner` and `save`d as a `QueueBatch`
//!    in the option store.
//! 2. **Invocation**: `handle()` takes the runner's run lock (a TTL lock, so a crashed
//!    invocation frees it eventually) and processes batches oldest first.
//! 3. **Checkpointing**: when the time/memory budget runs out, the remaining items are
//!    persisted and a new invocation is dispatched.
//! 4. **Reconciliation**: the healthcheck loop re-runs runners whose dispatch was lost.
//!
//! ## Submodules
//! - **`queue`**: batch persistence on top of the option store.
//! - **`runner`**: the runner itself plus the `QueueTask` and `Dispatcher` seams.
//! - **`registry`**: maps runner ids to runners.
//! - **`dispatcher`**: in-process spawn and HTTP loopback dispatch.
//! - **`healthcheck`**: periodic reconciliation.
//! - **`protocol`**: loopback endpoints and DTOs.

pub mod dispatcher;
pub mod handlers;
pub mod healthcheck;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod types;

#[cfg(test)]
mod tests;

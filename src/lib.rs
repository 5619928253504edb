//! Catalog Search Library
//!
//! Resumable background indexing of catalog entities (products, posts, taxonomy terms,
//! vendors, variations) and search-as-you-type queries against the result. The binary
//! (`main.rs`) hosts everything in one tokio process behind an axum HTTP surface.
//!
//! ## Architecture Modules
//! - **`storage`**: the persisted option store, the named mutex and the role-keyed
//!   index tables (wordlist, readable, taxonomy, vendor, variation).
//! - **`executor`**: job queue runners. Work is queued in persisted batches and drained
//!   by short, budget-limited invocations that re-dispatch themselves, with a
//!   healthcheck loop as the backstop for lost dispatches.
//! - **`indexer`**: the entity source seam and the sub-indexers that turn entity
//!   snapshots into index rows.
//! - **`builder`**: the build state machine. Plans a rebuild, feeds the stage runners,
//!   tracks progress and swaps a finished staging index in as live.
//! - **`search`**: the tokenizer and the query engine.
//! - **`app`**: wiring of all of the above plus the HTTP router.
//! - **`config`**, **`error`**, **`logs`**: settings, classified errors and the
//!   captured build log.

pub mod app;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod indexer;
pub mod logs;
pub mod search;
pub mod storage;

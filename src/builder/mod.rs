//! Index Builder Module
//!
//! Full rebuilds of the search index and incremental maintenance of the live copy.
//!
//! ## Responsibilities
//! - **Build state machine**: `Idle → Building → Done → Completed`, with `Error` and
//!   `Cancelling` side exits, persisted per role as a `BuildInfo` record.
//! - **Parallel building**: while a completed live index serves queries, a new build
//!   writes into the staging role and is swapped in atomically when it finishes.
//! - **Stage runners**: one queue runner per sub-indexer, so a build survives restarts
//!   and proceeds in short, budget-limited invocations.
//! - **Progress**: a weighted estimate over the stages of the build.
//!
//! ## Submodules
//! - **`builder`**: `IndexBuilder`, stage tasks and the role swap.
//! - **`info`**: build info persistence.
//! - **`progress`**: weighted progress.
//! - **`handlers`**: HTTP endpoints for build control, info and logs.

#[allow(clippy::module_inception)]
pub mod builder;
pub mod handlers;
pub mod info;
pub mod progress;
pub mod types;

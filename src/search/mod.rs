//! Search Service Module
//!
//! Turns a search-as-you-type phrase into ranked suggestions read from the live index.
//!
//! ## Responsibilities
//! - **Tokenization**: one tokenizer shared by the indexer and the query engine, with
//!   context-specific stopword, joiner and length rules.
//! - **Ranking**: term coverage weighted by stored field weights and hit counts.
//! - **Presentation**: suggestions hydrated from readable snapshots, grouped by entity
//!   type and capped per type.
//! - **Fallback**: while the index is not ready the entity source answers instead.
//!
//! ## Submodules
//! - **`engine`**: `QueryEngine` and its per-query `QuerySession`.
//! - **`handlers`**: the `GET /search` endpoint.
//! - **`tokenizer`**: indexer and search context tokenization.
//! - **`types`**: suggestions and the search response.

pub mod engine;
pub mod handlers;
pub mod tokenizer;
pub mod types;

#[cfg(test)]
mod tests;

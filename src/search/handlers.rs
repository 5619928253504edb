use super::engine::QueryEngine;
use super::types::SearchResponse;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub lang: Option<String>,
}

/// Always 200: an unready index degrades to the fallback search, an empty phrase to
/// an empty response.
pub async fn handle_search(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Query(params): Query<SearchParams>,
) -> (StatusCode, Json<SearchResponse>) {
    let response = engine
        .search_with_fallback(&params.q, params.lang.as_deref())
        .await;
    (StatusCode::OK, Json(response))
}

use super::builder::IndexBuilder;
use super::types::*;
use crate::error::{ErrorCode, IndexError};
use crate::logs::{LogBuffer, LogEntry};
use crate::storage::types::{DocType, IndexRole};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    pub hint: String,
}

fn error_response(err: &IndexError) -> (StatusCode, Json<Value>) {
    let code = err.code();
    let status = match code {
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::MissingTable => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        code: code.as_u32(),
        message: err.to_string(),
        hint: code.hint().to_string(),
    };
    (status, Json(serde_json::to_value(body).unwrap_or_default()))
}

fn ok_json<T: Serialize>(value: &T) -> (StatusCode, Json<Value>) {
    match serde_json::to_value(value) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => error_response(&IndexError::Other(e.into())),
    }
}

pub async fn handle_start_build(
    Extension(builder): Extension<Arc<IndexBuilder>>,
    body: Option<Json<BuildOptions>>,
) -> (StatusCode, Json<Value>) {
    let options = body.map(|Json(options)| options).unwrap_or_default();
    match builder.start_build(options).await {
        Ok(info) => ok_json(&info),
        Err(e) => {
            tracing::warn!(scope = "builder", "Build request rejected: {}", e);
            error_response(&e)
        }
    }
}

pub async fn handle_cancel_build(
    Extension(builder): Extension<Arc<IndexBuilder>>,
) -> (StatusCode, Json<Value>) {
    match builder.cancel_build().await {
        Ok(info) => ok_json(&info),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_build_status(
    Extension(builder): Extension<Arc<IndexBuilder>>,
) -> (StatusCode, Json<BuildStatusReport>) {
    (StatusCode::OK, Json(builder.status()))
}

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    pub key: String,
    pub role: Option<IndexRole>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub key: String,
    pub value: Option<Value>,
}

pub async fn handle_get_info(
    Extension(builder): Extension<Arc<IndexBuilder>>,
    Query(params): Query<InfoParams>,
) -> (StatusCode, Json<InfoResponse>) {
    let value = builder.get_info(&params.key, params.role);
    let status = if value.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(InfoResponse {
            key: params.key,
            value,
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default = "default_doc_type")]
    pub doc_type: DocType,
    pub ids: Vec<u64>,
}

fn default_doc_type() -> DocType {
    DocType::Product
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceResponse {
    pub applied: usize,
}

pub async fn handle_update_documents(
    Extension(builder): Extension<Arc<IndexBuilder>>,
    Json(req): Json<MaintenanceRequest>,
) -> (StatusCode, Json<Value>) {
    match builder.update_documents(req.doc_type, &req.ids).await {
        Ok(applied) => ok_json(&MaintenanceResponse { applied }),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_delete_documents(
    Extension(builder): Extension<Arc<IndexBuilder>>,
    Json(req): Json<MaintenanceRequest>,
) -> (StatusCode, Json<Value>) {
    match builder.delete_documents(req.doc_type, &req.ids) {
        Ok(applied) => ok_json(&MaintenanceResponse { applied }),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub limit: Option<usize>,
}

pub async fn handle_show_logs(
    Extension(logs): Extension<Arc<LogBuffer>>,
    Query(params): Query<LogParams>,
) -> (StatusCode, Json<Vec<LogEntry>>) {
    let limit = params.limit.unwrap_or(100);
    (StatusCode::OK, Json(logs.recent(limit)))
}

use super::healthcheck;
use super::protocol::*;
use super::registry::RunnerRegistry;
use super::types::now_ms;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

/// Loopback target. Always answers 200 so a failing runner never turns into a retry storm.
pub async fn handle_runner_dispatch(
    Extension(registry): Extension<Arc<RunnerRegistry>>,
    Path(runner_id): Path<String>,
) -> (StatusCode, Json<DispatchAck>) {
    let Some(runner) = registry.get(&runner_id) else {
        tracing::warn!(scope = "runner", "Dispatch for unknown runner {}", runner_id);
        return (
            StatusCode::OK,
            Json(DispatchAck {
                runner_id,
                accepted: false,
            }),
        );
    };

    tokio::spawn(async move {
        runner.handle().await;
    });

    (
        StatusCode::OK,
        Json(DispatchAck {
            runner_id,
            accepted: true,
        }),
    )
}

/// External cron trigger for the healthcheck.
pub async fn handle_healthcheck(
    Extension(registry): Extension<Arc<RunnerRegistry>>,
) -> (StatusCode, Json<HealthcheckReport>) {
    let report = healthcheck::tick(&registry, now_ms()).await;
    (StatusCode::OK, Json(report))
}

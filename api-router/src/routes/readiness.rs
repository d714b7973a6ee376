use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::api_state::ApiState;

/// 200 once SurrealDB answers a health check, 503 otherwise.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if let Err(err) = state.db.health().await {
        warn!(error = %err, "readiness check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail" }
            })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "checks": { "db": "ok" }
        })),
    )
}

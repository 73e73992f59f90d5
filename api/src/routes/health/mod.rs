use axum::{Json, Router, routing::get};
use chrono::Utc;
use common::state::AppState;
use serde_json::json;

use crate::response::ApiResponse;

/// GET /health — liveness probe.
async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        json!({
            "service": common::config::project_name(),
            "time": Utc::now().to_rfc3339(),
        }),
        "OK",
    ))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health))
}

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use common::state::AppState;
use services::attendance;

use super::common::{AttendanceSessionResponse, engine_error_response, find_session};
use crate::auth::guards::Empty;
use crate::response::ApiResponse;

/// PUT /api/modules/{module_id}/attendance/sessions/{session_id}/close
///
/// Early close. Idempotent: closing an already-closed session returns the
/// closed state again.
pub async fn close_session(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    match attendance::close_session(db, state.events(), session, now).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(session),
                "Attendance session closed",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

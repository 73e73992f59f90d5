use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use common::state::AppState;
use serde_json::json;
use services::attendance::{self, CreateSession, MarkSubmission, ReverifySubmission};
use services::slots::RetryOutcome;
use services::EngineError;
use std::net::SocketAddr;

use super::common::{
    AttendanceRecordResponse, AttendanceSessionResponse, CreateSessionReq, MarkAttendanceReq,
    OverridePresentReq, SubmitReverifyReq, TargetStudentsReq, engine_error_response, find_session,
};
use crate::auth::AuthUser;
use crate::auth::guards::Empty;
use crate::response::ApiResponse;

/// POST /api/modules/{module_id}/attendance/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Path(module_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<CreateSessionReq>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let params = CreateSession {
        module_id,
        created_by: claims.sub,
        lat: body.lat,
        lng: body.lng,
        radius_m: body.radius_m,
        initial_secs: body.initial_secs,
        reverify_secs: body.reverify_secs,
        token_rotation_ms: body.token_rotation_ms,
        token_grace_ms: body.token_grace_ms,
    };

    match attendance::create_session(db, state.events(), params, now).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                AttendanceSessionResponse::from(session),
                "Attendance session created",
            )),
        )
            .into_response(),
        Err(EngineError::DuplicateActiveSession { existing_id }) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error_with_data(
                json!({ "existing_session_id": existing_id }),
                "An active session already exists for this module",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// POST /api/modules/{module_id}/attendance/sessions/{session_id}/mark
pub async fn mark_attendance(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<MarkAttendanceReq>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    let submission = MarkSubmission {
        token: body.token,
        lat: body.lat,
        lng: body.lng,
        biometric_verified: body.biometric_verified,
    };

    match attendance::mark_attendance(
        db,
        state.events(),
        session,
        claims.sub,
        Some(addr.ip()),
        submission,
        now,
    )
    .await
    {
        Ok(record) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                AttendanceRecordResponse::from(record),
                "Attendance recorded",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// POST /api/modules/{module_id}/attendance/sessions/{session_id}/reverify
pub async fn submit_reverify(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<SubmitReverifyReq>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    let submission = ReverifySubmission {
        token: body.token,
        biometric_verified: body.biometric_verified,
    };

    match attendance::submit_reverify(db, state.events(), session, claims.sub, submission, now)
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceRecordResponse::from(record),
                "Reverification passed",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// POST /api/modules/{module_id}/attendance/sessions/{session_id}/reverify/retry
///
/// A terminal failure here is an outcome, not an error: the caller asked a
/// valid question and the answer is "no more slots for you".
pub async fn request_retry(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    match attendance::request_retry(db, state.events(), session, claims.sub, now).await {
        Ok(RetryOutcome::NewSlot(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceRecordResponse::from(record),
                "Retry slot assigned",
            )),
        )
            .into_response(),
        Ok(RetryOutcome::Failed(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceRecordResponse::from(record),
                "Reverification failed; no retries remain",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// POST /api/modules/{module_id}/attendance/sessions/{session_id}/reverify/target
pub async fn target_students(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
    Json(body): Json<TargetStudentsReq>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    match attendance::target_students(db, state.events(), session, &body.user_ids, now).await {
        Ok(assigned) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                json!({ "assigned_user_ids": assigned }),
                "Targeted students pulled into reverification",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// POST /api/modules/{module_id}/attendance/sessions/{session_id}/reverify/override
pub async fn override_present(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
    Json(body): Json<OverridePresentReq>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    match attendance::manual_present(db, state.events(), session, body.user_id, now).await {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AttendanceRecordResponse::from(record),
                "Student marked present manually",
            )),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use common::state::AppState;
use db::models::attendance_record::{Column as RecordCol, Entity as RecordEntity};
use db::models::attendance_session::{Column as SessionCol, Entity as SessionEntity};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use services::{attendance, phase};

use super::common::{
    AttendanceRecordResponse, AttendanceSessionResponse, engine_error_response, find_session,
};
use crate::auth::AuthUser;
use crate::auth::guards::Empty;
use crate::response::ApiResponse;

#[derive(Serialize, Default)]
pub struct SessionListResponse {
    pub sessions: Vec<AttendanceSessionResponse>,
}

#[derive(Serialize, Default)]
pub struct SessionDetailResponse {
    pub session: AttendanceSessionResponse,
    pub records: Vec<AttendanceRecordResponse>,
}

/// GET /api/modules/{module_id}/attendance/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(module_id): Path<i64>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let sessions = match SessionEntity::find()
        .filter(SessionCol::ModuleId.eq(module_id))
        .order_by_desc(SessionCol::StartedAt)
        .all(db)
        .await
    {
        Ok(rows) => rows,
        Err(e) => return engine_error_response::<Empty>(e.into()).into_response(),
    };

    let mut out = Vec::with_capacity(sessions.len());
    for session in sessions {
        let session = match phase::sync(db, state.events(), session, now).await {
            Ok(s) => s,
            Err(e) => return engine_error_response::<Empty>(e).into_response(),
        };
        let attended = RecordEntity::find()
            .filter(RecordCol::SessionId.eq(session.id))
            .count(db)
            .await
            .unwrap_or(0);
        let flagged = RecordEntity::find()
            .filter(RecordCol::SessionId.eq(session.id))
            .filter(RecordCol::Flagged.eq(true))
            .count(db)
            .await
            .unwrap_or(0);
        out.push(AttendanceSessionResponse::from_with_counts(
            session,
            attended as i64,
            flagged as i64,
        ));
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            SessionListResponse { sessions: out },
            "Attendance sessions retrieved",
        )),
    )
        .into_response()
}

/// GET /api/modules/{module_id}/attendance/sessions/{session_id}
///
/// Monitoring view: the session plus every record with its confidence, flag
/// and reverification state.
pub async fn get_session(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };
    let session = match phase::sync(db, state.events(), session, now).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    let records = match attendance::session_records(db, session.id).await {
        Ok(rows) => rows,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };
    let attended = records.len() as i64;
    let flagged = records.iter().filter(|r| r.flagged).count() as i64;

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            SessionDetailResponse {
                session: AttendanceSessionResponse::from_with_counts(session, attended, flagged),
                records: records.into_iter().map(Into::into).collect(),
            },
            "Attendance session retrieved",
        )),
    )
        .into_response()
}

/// GET /api/modules/{module_id}/attendance/sessions/{session_id}/token
///
/// The lecturer's live rotating token for projection. Never exposes the
/// session secret itself.
pub async fn get_live_token(
    State(state): State<AppState>,
    Path((module_id, session_id)): Path<(i64, i64)>,
) -> Response {
    let db = state.db();
    let now = Utc::now();

    let session = match find_session(db, module_id, session_id).await {
        Ok(s) => s,
        Err(e) => return engine_error_response::<Empty>(e).into_response(),
    };

    match attendance::live_token(db, state.events(), session, now).await {
        Ok((_, view)) => (
            StatusCode::OK,
            Json(ApiResponse::success(view, "Live token retrieved")),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

/// GET /api/modules/{module_id}/attendance/sessions/{session_id}/reverify
///
/// Student poll: selection state, slot window and retry eligibility.
pub async fn get_reverify_status(
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

    match attendance::reverify_status(db, state.events(), session, claims.sub, now).await {
        Ok(view) => (
            StatusCode::OK,
            Json(ApiResponse::success(view, "Reverification status retrieved")),
        )
            .into_response(),
        Err(e) => engine_error_response::<Empty>(e).into_response(),
    }
}

use axum::{Json, http::StatusCode};
use chrono::{DateTime, Utc};
use db::models::attendance_record::{Model as RecordModel, ReverifyStatus};
use db::models::attendance_session::{
    Column as SessionCol, Entity as SessionEntity, Model as SessionModel, Phase, Status,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use services::EngineError;

use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct CreateSessionReq {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub initial_secs: i64,
    pub reverify_secs: i64,
    pub token_rotation_ms: Option<i64>,
    pub token_grace_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceReq {
    pub token: String,
    pub lat: f64,
    pub lng: f64,
    pub biometric_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubmitReverifyReq {
    pub token: String,
    pub biometric_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct TargetStudentsReq {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OverridePresentReq {
    pub user_id: i64,
}

#[derive(Debug, Serialize, Default)]
pub struct AttendanceSessionResponse {
    pub id: i64,
    pub module_id: i64,
    pub created_by: i64,
    pub status: Option<Status>,
    pub phase: Option<Phase>,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub started_at: String,
    pub initial_ends_at: String,
    pub reverify_ends_at: String,
    pub closed_at: Option<String>,
    pub token_rotation_ms: i64,
    pub token_grace_ms: i64,
    pub reverify_selected_count: i32,
    pub attended_count: i64,
    pub flagged_count: i64,
}

impl From<SessionModel> for AttendanceSessionResponse {
    fn from(m: SessionModel) -> Self {
        Self {
            id: m.id,
            module_id: m.module_id,
            created_by: m.created_by,
            status: Some(m.status),
            phase: Some(m.phase),
            lat: m.lat,
            lng: m.lng,
            radius_m: m.radius_m,
            started_at: m.started_at.to_rfc3339(),
            initial_ends_at: m.initial_ends_at.to_rfc3339(),
            reverify_ends_at: m.reverify_ends_at.to_rfc3339(),
            closed_at: m.closed_at.map(|t| t.to_rfc3339()),
            token_rotation_ms: m.token_rotation_ms,
            token_grace_ms: m.token_grace_ms,
            reverify_selected_count: m.reverify_selected_count,
            attended_count: 0,
            flagged_count: 0,
        }
    }
}

impl AttendanceSessionResponse {
    pub fn from_with_counts(m: SessionModel, attended_count: i64, flagged_count: i64) -> Self {
        let mut base = Self::from(m);
        base.attended_count = attended_count;
        base.flagged_count = flagged_count;
        base
    }
}

#[derive(Debug, Serialize)]
pub struct AttendanceRecordResponse {
    pub user_id: i64,
    pub marked_at: String,
    pub confidence: i32,
    pub flagged: bool,
    pub gps_distance_m: f64,
    pub anomaly_score: i32,
    pub reverify_required: bool,
    pub reverify_status: Option<ReverifyStatus>,
    pub reverify_slot_start: Option<DateTime<Utc>>,
    pub reverify_deadline: Option<DateTime<Utc>>,
    pub reverify_attempt_count: i32,
    pub manual_override: bool,
}

impl From<RecordModel> for AttendanceRecordResponse {
    fn from(m: RecordModel) -> Self {
        Self {
            user_id: m.user_id,
            marked_at: m.marked_at.to_rfc3339(),
            confidence: m.confidence,
            flagged: m.flagged,
            gps_distance_m: m.gps_distance_m,
            anomaly_score: m.anomaly_score,
            reverify_required: m.reverify_required,
            reverify_status: m.reverify_status,
            reverify_slot_start: m.reverify_requested_at,
            reverify_deadline: m.reverify_deadline_at,
            reverify_attempt_count: m.reverify_attempt_count,
            manual_override: m.reverify_manual_override,
        }
    }
}

/// Loads a session scoped to its module; a session id from another module
/// reads as not found.
pub async fn find_session(
    db: &DatabaseConnection,
    module_id: i64,
    session_id: i64,
) -> Result<SessionModel, EngineError> {
    SessionEntity::find()
        .filter(SessionCol::Id.eq(session_id))
        .filter(SessionCol::ModuleId.eq(module_id))
        .one(db)
        .await?
        .ok_or(EngineError::SessionNotFound)
}

/// Maps an engine error onto the HTTP taxonomy: not-found → 404, permission
/// problems → 403, state conflicts → 409, other client errors → 400,
/// infrastructure → 500 (logged, message withheld).
pub fn engine_error_response<T>(err: EngineError) -> (StatusCode, Json<ApiResponse<T>>)
where
    T: Serialize + Default,
{
    let status = match &err {
        EngineError::SessionNotFound | EngineError::RecordNotFound => StatusCode::NOT_FOUND,
        EngineError::NotEnrolled | EngineError::NotSelected => StatusCode::FORBIDDEN,
        EngineError::AlreadyMarked
        | EngineError::SlotAlreadyUsed
        | EngineError::ReverifyFailed
        | EngineError::DuplicateActiveSession { .. } => StatusCode::CONFLICT,
        EngineError::InvalidToken
        | EngineError::TokenNotForSlot
        | EngineError::WrongPhase(_)
        | EngineError::BiometricRequired
        | EngineError::SlotStillOpen
        | EngineError::SlotMissed => StatusCode::BAD_REQUEST,
        EngineError::Db(e) => {
            tracing::error!(error = %e, "attendance engine database error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Internal server error")),
            );
        }
    };
    (status, Json(ApiResponse::error(err.to_string())))
}

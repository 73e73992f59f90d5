use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One mark per (session, student), enforced by the composite primary key.
///
/// The reverify sub-state forms an audit trail: rows are never deleted, only
/// appended-to as the slot allocator and the student's submissions move the
/// record through the retry FSM.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,

    pub marked_at: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub ip_address: Option<String>,
    /// Token sequence accepted at marking time.
    pub token_window: i64,
    pub confidence: i32,
    pub flagged: bool,
    pub gps_distance_m: f64,
    pub anomaly_score: i32,

    pub reverify_required: bool,
    pub reverify_status: Option<ReverifyStatus>,
    pub reverify_requested_at: Option<DateTime<Utc>>,
    pub reverify_deadline_at: Option<DateTime<Utc>>,
    pub reverify_attempt_count: i32,
    pub reverify_retry_count: i32,
    pub reverify_marked_at: Option<DateTime<Utc>>,
    pub reverify_manual_override: bool,
    pub reverify_passkey_used: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReverifyStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "retry_pending")]
    RetryPending,
    #[sea_orm(string_value = "passed")]
    Passed,
    #[sea_orm(string_value = "manual_present")]
    ManualPresent,
    #[sea_orm(string_value = "missed")]
    Missed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ReverifyStatus {
    /// PASSED, MANUAL_PRESENT and FAILED are terminal for the sub-state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReverifyStatus::Passed | ReverifyStatus::ManualPresent | ReverifyStatus::Failed
        )
    }

    /// States holding an open slot that a deadline can expire.
    pub fn is_open(self) -> bool {
        matches!(self, ReverifyStatus::Pending | ReverifyStatus::RetryPending)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

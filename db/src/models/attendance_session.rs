use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One live lecture instance for a module.
///
/// `phase` and `status` are caches of the last-observed derivation; the source
/// of truth is [`Model::phase_at`], a pure function of the stored timestamps
/// and the caller's clock. The `secret` is write-once at creation and must
/// never be serialized to clients.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub module_id: i64,
    pub created_by: i64,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: Status,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub initial_ends_at: DateTime<Utc>,
    pub reverify_ends_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub token_rotation_ms: i64,
    pub token_grace_ms: i64,
    pub reverify_selection_done: bool,
    pub reverify_selected_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "closed")]
    Closed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Phase {
    #[sea_orm(string_value = "initial")]
    Initial,
    #[sea_orm(string_value = "reverify")]
    Reverify,
    #[sea_orm(string_value = "closed")]
    Closed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::module::Entity",
        from = "Column::ModuleId",
        to = "super::module::Column::Id"
    )]
    Module,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::CreatedBy",
        to = "super::user::Column::Id"
    )]
    Creator,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Module.def()
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Derives the phase for `now` from stored timestamps alone.
    ///
    /// A force-closed session is CLOSED regardless of the clock.
    pub fn phase_at(&self, now: DateTime<Utc>) -> Phase {
        if self.status == Status::Closed {
            return Phase::Closed;
        }
        if now < self.initial_ends_at {
            Phase::Initial
        } else if now < self.reverify_ends_at {
            Phase::Reverify
        } else {
            Phase::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn session(status: Status) -> Model {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Model {
            id: 1,
            module_id: 1,
            created_by: 1,
            lat: -25.7545,
            lng: 28.2314,
            radius_m: 500.0,
            secret: "00".repeat(32),
            status,
            phase: Phase::Initial,
            started_at: t0,
            initial_ends_at: t0 + Duration::minutes(5),
            reverify_ends_at: t0 + Duration::minutes(9),
            closed_at: None,
            token_rotation_ms: 5000,
            token_grace_ms: 1500,
            reverify_selection_done: false,
            reverify_selected_count: 0,
            created_at: t0,
            updated_at: t0,
        }
    }

    #[test]
    fn phase_follows_wall_clock_boundaries() {
        let s = session(Status::Active);
        assert_eq!(s.phase_at(s.started_at), Phase::Initial);
        assert_eq!(
            s.phase_at(s.initial_ends_at - Duration::seconds(1)),
            Phase::Initial
        );
        // boundary is inclusive on the reverify side
        assert_eq!(s.phase_at(s.initial_ends_at), Phase::Reverify);
        assert_eq!(
            s.phase_at(s.reverify_ends_at - Duration::seconds(1)),
            Phase::Reverify
        );
        assert_eq!(s.phase_at(s.reverify_ends_at), Phase::Closed);
    }

    #[test]
    fn force_closed_session_is_closed_at_any_time() {
        let s = session(Status::Closed);
        assert_eq!(s.phase_at(s.started_at), Phase::Closed);
    }
}

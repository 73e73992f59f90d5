//! Orchestration facade for the attendance verification engine.
//!
//! Every operation syncs the phase state machine first, so callers always see
//! a time-consistent view, then layers the token protocol, geolocation
//! evaluator, confidence fusion and slot allocator on top.

use chrono::{DateTime, Duration, Utc};
use common::events::{AttendanceEvent, EventDispatcher};
use db::models::anomaly_event;
use db::models::attendance_record::{
    ActiveModel as RecordActive, Column as RecordCol, Entity as RecordEntity, Model as Record,
    ReverifyStatus,
};
use db::models::attendance_session::{
    ActiveModel as SessionActive, Column as SessionCol, Entity as SessionEntity, Model as Session,
    Phase, Status,
};
use db::models::user;
use db::models::user_module_role::Role;
use rand::RngCore;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::Serialize;
use std::net::IpAddr;

use crate::error::EngineError;
use crate::{confidence, geolocation, phase, slots, token};

#[derive(Debug, Clone)]
pub struct CreateSession {
    pub module_id: i64,
    pub created_by: i64,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub initial_secs: i64,
    pub reverify_secs: i64,
    pub token_rotation_ms: Option<i64>,
    pub token_grace_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MarkSubmission {
    pub token: String,
    pub lat: f64,
    pub lng: f64,
    pub biometric_verified: bool,
}

#[derive(Debug, Clone)]
pub struct ReverifySubmission {
    pub token: String,
    pub biometric_verified: bool,
}

/// Lecturer display payload.
#[derive(Debug, Clone, Serialize)]
pub struct LiveToken {
    pub phase: Phase,
    pub token: Option<String>,
    pub sequence: i64,
    pub ms_to_rotation: i64,
}

/// Student poll payload for the reverify window.
#[derive(Debug, Clone, Serialize)]
pub struct ReverifyView {
    pub phase: Phase,
    pub required: bool,
    pub status: Option<ReverifyStatus>,
    pub slot_start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub seconds_until_slot: Option<i64>,
    pub can_retry: bool,
}

/// Creates a session in INITIAL/ACTIVE, enforcing one active session per
/// module. Losing callers get a conflict pointing at the winning session.
pub async fn create_session(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    params: CreateSession,
    now: DateTime<Utc>,
) -> Result<Session, EngineError> {
    let actives = SessionEntity::find()
        .filter(SessionCol::ModuleId.eq(params.module_id))
        .filter(SessionCol::Status.eq(Status::Active))
        .all(db)
        .await?;
    for existing in actives {
        // A cached-ACTIVE session past its window just needed a sync.
        let synced = phase::sync(db, events, existing, now).await?;
        if synced.is_active() {
            return Err(EngineError::DuplicateActiveSession {
                existing_id: synced.id,
            });
        }
    }

    let initial_secs = params.initial_secs.max(1);
    let reverify_secs = params.reverify_secs.max(1);

    let rotation_ms = params
        .token_rotation_ms
        .unwrap_or_else(common::config::token_rotation_ms)
        .clamp(1000, 60_000);

    // Slots reuse the token sequence grid, so the reverify window must open
    // on a rotation boundary.
    let initial_ends = align_to_rotation(now + Duration::seconds(initial_secs), rotation_ms);
    let reverify_ends = initial_ends + Duration::seconds(reverify_secs);

    let mut secret_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret_bytes);

    let inserted = SessionActive {
        module_id: Set(params.module_id),
        created_by: Set(params.created_by),
        lat: Set(params.lat),
        lng: Set(params.lng),
        radius_m: Set(params.radius_m),
        secret: Set(hex::encode(secret_bytes)),
        status: Set(Status::Active),
        phase: Set(Phase::Initial),
        started_at: Set(now),
        initial_ends_at: Set(initial_ends),
        reverify_ends_at: Set(reverify_ends),
        closed_at: Set(None),
        token_rotation_ms: Set(rotation_ms),
        token_grace_ms: Set(params
            .token_grace_ms
            .unwrap_or_else(common::config::token_grace_ms)
            .max(0)),
        reverify_selection_done: Set(false),
        reverify_selected_count: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await;

    match inserted {
        Ok(session) => Ok(session),
        // The partial unique index on active sessions catches the race two
        // concurrent creates can slip through the check above.
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            let winner = SessionEntity::find()
                .filter(SessionCol::ModuleId.eq(params.module_id))
                .filter(SessionCol::Status.eq(Status::Active))
                .one(db)
                .await?
                .ok_or(EngineError::SessionNotFound)?;
            Err(EngineError::DuplicateActiveSession {
                existing_id: winner.id,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Rounds `at` up to the next rotation boundary on the epoch millisecond grid.
fn align_to_rotation(at: DateTime<Utc>, rotation_ms: i64) -> DateTime<Utc> {
    let rem = at.timestamp_millis().rem_euclid(rotation_ms);
    if rem == 0 {
        at
    } else {
        at + Duration::milliseconds(rotation_ms - rem)
    }
}

/// Current token for the lecturer's rotating QR display.
pub async fn live_token(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    now: DateTime<Utc>,
) -> Result<(Session, LiveToken), EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    let seq = token::sequence(now, session.token_rotation_ms);
    let minted = match session.phase {
        Phase::Initial | Phase::Reverify => Some(token::mint(
            &session.secret,
            session.id,
            session.phase,
            seq,
        )),
        Phase::Closed => None,
    };
    let view = LiveToken {
        phase: session.phase,
        token: minted,
        sequence: seq,
        ms_to_rotation: token::ms_until_rotation(now, session.token_rotation_ms),
    };
    Ok((session, view))
}

/// Initial-phase mark submission.
///
/// The token is the hard gate (anti-replay); GPS, biometric and network are
/// scored signals. A lost insert race is a no-op success returning the
/// winning row, never a duplicate.
pub async fn mark_attendance(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_id: i64,
    client_ip: Option<IpAddr>,
    submission: MarkSubmission,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    if session.phase != Phase::Initial {
        return Err(EngineError::WrongPhase(session.phase));
    }

    if !user::Model::is_in_role(db, user_id, session.module_id, Role::Student).await? {
        return Err(EngineError::NotEnrolled);
    }

    if RecordEntity::find_by_id((session.id, user_id))
        .one(db)
        .await?
        .is_some()
    {
        return Err(EngineError::AlreadyMarked);
    }

    let accepted_seq = token::verify(
        &session.secret,
        &submission.token,
        session.id,
        Phase::Initial,
        now,
        session.token_rotation_ms,
        session.token_grace_ms,
    )
    .ok_or(EngineError::InvalidToken)?;

    let org = phase::org_for_session(db, &session).await?;
    let proximity = geolocation::within_radius(
        submission.lat,
        submission.lng,
        session.lat,
        session.lng,
        session.radius_m,
    );
    let findings =
        geolocation::evaluate_history(db, user_id, submission.lat, submission.lng, now).await?;

    let signals = confidence::Signals {
        biometric_verified: submission.biometric_verified,
        within_radius: proximity.within,
        token_valid: true,
        network_trusted: client_ip.is_some_and(|ip| org.is_trusted_ip(ip)),
    };
    let score = confidence::score(signals);
    let flagged = confidence::flagged(score, org.confidence_threshold, !findings.is_empty());

    let active = RecordActive {
        session_id: Set(session.id),
        user_id: Set(user_id),
        marked_at: Set(now),
        lat: Set(submission.lat),
        lng: Set(submission.lng),
        ip_address: Set(client_ip.map(|ip| ip.to_string())),
        token_window: Set(accepted_seq),
        confidence: Set(score),
        flagged: Set(flagged),
        gps_distance_m: Set(proximity.distance_m),
        anomaly_score: Set(geolocation::anomaly_score(&findings)),
        reverify_required: Set(false),
        reverify_status: Set(None),
        reverify_requested_at: Set(None),
        reverify_deadline_at: Set(None),
        reverify_attempt_count: Set(0),
        reverify_retry_count: Set(0),
        reverify_marked_at: Set(None),
        reverify_manual_override: Set(false),
        reverify_passkey_used: Set(false),
    };

    let inserted = RecordEntity::insert(active)
        .on_conflict(
            OnConflict::columns([RecordCol::SessionId, RecordCol::UserId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let record = RecordEntity::find_by_id((session.id, user_id))
        .one(db)
        .await?
        .ok_or(EngineError::RecordNotFound)?;

    if inserted == 0 {
        // Lost a simultaneous-submit race; the winner's row stands.
        return Ok(record);
    }

    for finding in &findings {
        anomaly_event::Model::record(
            db,
            session.id,
            user_id,
            finding.anomaly_type,
            finding.severity,
            Some(finding.detail.clone()),
        )
        .await?;
    }

    events.dispatch(AttendanceEvent::AttendanceMarked {
        session_id: session.id,
        user_id,
        confidence: record.confidence,
        flagged: record.flagged,
        marked_at: now,
    });
    Ok(record)
}

/// Student poll: where is my slot, and can I still act on it?
pub async fn reverify_status(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<ReverifyView, EngineError> {
    let session = phase::sync(db, events, session, now).await?;

    let record = match RecordEntity::find_by_id((session.id, user_id)).one(db).await? {
        Some(rec) => slots::observe_deadline(db, rec, now).await?,
        None => {
            return Ok(ReverifyView {
                phase: session.phase,
                required: false,
                status: None,
                slot_start: None,
                deadline: None,
                seconds_until_slot: None,
                can_retry: false,
            });
        }
    };

    let can_retry = record.reverify_status == Some(ReverifyStatus::Missed)
        && record.reverify_attempt_count < common::config::reverify_max_attempts()
        && record.reverify_retry_count < common::config::reverify_max_retries();

    Ok(ReverifyView {
        phase: session.phase,
        required: record.reverify_required,
        status: record.reverify_status,
        slot_start: record.reverify_requested_at,
        deadline: record.reverify_deadline_at,
        seconds_until_slot: record
            .reverify_requested_at
            .map(|s| (s - now).num_seconds().max(0)),
        can_retry,
    })
}

/// Reverify submission: slot-bound token plus a fresh biometric result.
pub async fn submit_reverify(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_id: i64,
    submission: ReverifySubmission,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    if session.phase != Phase::Reverify {
        return Err(EngineError::WrongPhase(session.phase));
    }

    let record = RecordEntity::find_by_id((session.id, user_id))
        .one(db)
        .await?
        .ok_or(EngineError::NotSelected)?;
    if !record.reverify_required {
        return Err(EngineError::NotSelected);
    }
    let record = slots::observe_deadline(db, record, now).await?;

    match record.reverify_status {
        None => Err(EngineError::NotSelected),
        Some(ReverifyStatus::Passed) | Some(ReverifyStatus::ManualPresent) => {
            Err(EngineError::SlotAlreadyUsed)
        }
        Some(ReverifyStatus::Failed) => Err(EngineError::ReverifyFailed),
        Some(ReverifyStatus::Missed) => Err(EngineError::SlotMissed),
        Some(ReverifyStatus::Pending) | Some(ReverifyStatus::RetryPending) => {
            if !submission.biometric_verified {
                return Err(EngineError::BiometricRequired);
            }
            let slot_seq = slots::record_slot_sequence(&session, &record)
                .ok_or(EngineError::NotSelected)?;
            if !token::verify_for_slot(
                &session.secret,
                &submission.token,
                session.id,
                slot_seq,
                now,
                session.token_rotation_ms,
                session.token_grace_ms,
            ) {
                return Err(EngineError::TokenNotForSlot);
            }

            let org = phase::org_for_session(db, &session).await?;
            let clean = record.confidence >= org.confidence_threshold
                && record.anomaly_score == 0;

            let mut active: RecordActive = record.into_active_model();
            active.reverify_status = Set(Some(ReverifyStatus::Passed));
            active.reverify_marked_at = Set(Some(now));
            active.reverify_passkey_used = Set(true);
            active.flagged = Set(!clean);
            let rec = active.update(db).await?;

            events.dispatch(AttendanceEvent::ReverifyOutcome {
                session_id: rec.session_id,
                user_id: rec.user_id,
                status: ReverifyStatus::Passed.to_string(),
                at: now,
            });
            Ok(rec)
        }
    }
}

/// Retry request: new slot, or terminal FAILED once caps or capacity run out.
pub async fn request_retry(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<slots::RetryOutcome, EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    if session.phase != Phase::Reverify {
        return Err(EngineError::WrongPhase(session.phase));
    }
    let record = RecordEntity::find_by_id((session.id, user_id))
        .one(db)
        .await?
        .ok_or(EngineError::NotSelected)?;
    if !record.reverify_required {
        return Err(EngineError::NotSelected);
    }
    let org = phase::org_for_session(db, &session).await?;
    slots::request_retry(
        db,
        events,
        &session,
        record,
        org.reverify_slot_capacity,
        now,
    )
    .await
}

/// Staff spot check: pull named marked students into REVERIFY now.
/// Returns the user ids that actually received a slot.
pub async fn target_students(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<Vec<i64>, EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    if session.phase != Phase::Reverify {
        return Err(EngineError::WrongPhase(session.phase));
    }
    let org = phase::org_for_session(db, &session).await?;

    let mut assigned = Vec::new();
    for &user_id in user_ids {
        let Some(record) = RecordEntity::find_by_id((session.id, user_id)).one(db).await?
        else {
            continue;
        };
        if let slots::AssignOutcome::Assigned(rec) = slots::target_student(
            db,
            events,
            &session,
            record,
            org.reverify_slot_capacity,
            now,
        )
        .await?
        {
            assigned.push(rec.user_id);
        }
    }
    Ok(assigned)
}

/// Staff override: force MANUAL_PRESENT on a record.
pub async fn manual_present(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let session = phase::sync(db, events, session, now).await?;
    let record = RecordEntity::find_by_id((session.id, user_id))
        .one(db)
        .await?
        .ok_or(EngineError::RecordNotFound)?;
    slots::manual_present(db, events, record, now).await
}

/// Explicit staff close; also finalizes outstanding reverify records.
pub async fn close_session(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    now: DateTime<Utc>,
) -> Result<Session, EngineError> {
    phase::close(db, events, &session, now).await?;
    SessionEntity::find_by_id(session.id)
        .one(db)
        .await?
        .ok_or(EngineError::SessionNotFound)
}

/// Monitoring view: all records for a session, newest first.
pub async fn session_records(
    db: &DatabaseConnection,
    session_id: i64,
) -> Result<Vec<Record>, EngineError> {
    Ok(RecordEntity::find()
        .filter(RecordCol::SessionId.eq(session_id))
        .order_by_desc(RecordCol::MarkedAt)
        .all(db)
        .await?)
}

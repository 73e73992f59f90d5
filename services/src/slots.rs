//! Reverification slot allocator and per-record retry FSM.
//!
//! The REVERIFY window is divided into fixed-capacity slots aligned to the
//! token rotation grid: slot `k` spans
//! `[initial_ends_at + k*rot, initial_ends_at + (k+1)*rot)` and corresponds
//! 1:1 to the token sequence of its start instant. Allocation runs inside a
//! transaction so concurrent retry requests cannot oversubscribe a slot.

use chrono::{DateTime, Duration, Utc};
use common::config;
use common::events::{AttendanceEvent, EventDispatcher};
use db::models::attendance_record::{
    ActiveModel as RecordActive, Column as RecordCol, Entity as RecordEntity, Model as Record,
    ReverifyStatus,
};
use db::models::attendance_session::Model as Session;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, Set, TransactionTrait, TransactionError,
};

use crate::error::EngineError;
use crate::token;

/// A claimed slot: the window bounds and the token sequence bound to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotAssignment {
    pub slot_start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub sequence: i64,
}

#[derive(Debug)]
pub enum AssignOutcome {
    Assigned(Record),
    /// No slot with free capacity remains before the window closes.
    NoCapacity(Record),
}

#[derive(Debug)]
pub enum RetryOutcome {
    NewSlot(Record),
    /// Caps or capacity exhausted; the record is now terminal FAILED.
    Failed(Record),
}

/// Number of whole slots that fit in the REVERIFY window.
pub fn slot_count(session: &Session) -> i64 {
    let window_ms = (session.reverify_ends_at - session.initial_ends_at).num_milliseconds();
    window_ms.div_euclid(session.token_rotation_ms.max(1))
}

pub fn slot_start(session: &Session, k: i64) -> DateTime<Utc> {
    session.initial_ends_at + Duration::milliseconds(k * session.token_rotation_ms)
}

/// Token sequence bound to slot `k`. Slots sit on the global rotation grid,
/// so each slot advances the sequence of the window start by exactly one.
pub fn slot_sequence(session: &Session, k: i64) -> i64 {
    token::sequence(session.initial_ends_at, session.token_rotation_ms) + k
}

/// Recovers the slot sequence a record is bound to from its open slot pair.
pub fn record_slot_sequence(session: &Session, record: &Record) -> Option<i64> {
    let requested_at = record.reverify_requested_at?;
    let k = (requested_at - session.initial_ends_at)
        .num_milliseconds()
        .div_euclid(session.token_rotation_ms.max(1));
    Some(slot_sequence(session, k))
}

/// First slot index that still lies fully ahead of `now`.
fn first_candidate(session: &Session, now: DateTime<Utc>) -> i64 {
    if now < session.initial_ends_at {
        0
    } else {
        (now - session.initial_ends_at)
            .num_milliseconds()
            .div_euclid(session.token_rotation_ms.max(1))
            + 1
    }
}

/// Scans forward from `now` for the first slot with free capacity.
///
/// Occupancy is the number of records currently holding that slot
/// (`reverify_requested_at == slot_start`); a record holds at most one open
/// slot at a time, so retries release their old seat by moving the pair.
async fn find_free_slot<C: ConnectionTrait>(
    conn: &C,
    session: &Session,
    capacity: i32,
    now: DateTime<Utc>,
) -> Result<Option<SlotAssignment>, DbErr> {
    let capacity = capacity.max(1) as u64;
    let total = slot_count(session);
    for k in first_candidate(session, now)..total {
        let start = slot_start(session, k);
        let occupied = RecordEntity::find()
            .filter(RecordCol::SessionId.eq(session.id))
            .filter(RecordCol::ReverifyRequestedAt.eq(start))
            .count(conn)
            .await?;
        if occupied < capacity {
            return Ok(Some(SlotAssignment {
                slot_start: start,
                deadline: slot_start(session, k + 1),
                sequence: slot_sequence(session, k),
            }));
        }
    }
    Ok(None)
}

fn flatten_txn(err: TransactionError<DbErr>) -> EngineError {
    match err {
        TransactionError::Connection(e) | TransactionError::Transaction(e) => e.into(),
    }
}

/// Assigns the next free slot to a record and advances the attempt counters.
///
/// The capacity check and the record write share one transaction; two
/// concurrent allocations for the last seat serialize, and the loser moves on
/// to the following slot.
pub async fn assign_slot(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: &Session,
    record: Record,
    capacity: i32,
    now: DateTime<Utc>,
    is_retry: bool,
) -> Result<AssignOutcome, EngineError> {
    let session = session.clone();
    let outcome = db
        .transaction::<_, AssignOutcome, DbErr>(move |txn| {
            Box::pin(async move {
                let Some(slot) = find_free_slot(txn, &session, capacity, now).await? else {
                    return Ok(AssignOutcome::NoCapacity(record));
                };

                let attempts = record.reverify_attempt_count;
                let retries = record.reverify_retry_count;
                let mut active: RecordActive = record.into_active_model();
                active.reverify_required = Set(true);
                active.reverify_status = Set(Some(if is_retry {
                    ReverifyStatus::RetryPending
                } else {
                    ReverifyStatus::Pending
                }));
                active.reverify_requested_at = Set(Some(slot.slot_start));
                active.reverify_deadline_at = Set(Some(slot.deadline));
                active.reverify_attempt_count = Set(attempts + 1);
                if is_retry {
                    active.reverify_retry_count = Set(retries + 1);
                }
                Ok(AssignOutcome::Assigned(active.update(txn).await?))
            })
        })
        .await
        .map_err(flatten_txn)?;

    if let AssignOutcome::Assigned(rec) = &outcome {
        events.dispatch(AttendanceEvent::ReverifySlotOpened {
            session_id: rec.session_id,
            user_id: rec.user_id,
            slot_start: rec.reverify_requested_at.unwrap_or(now),
            deadline: rec.reverify_deadline_at.unwrap_or(now),
            is_retry,
        });
    }
    Ok(outcome)
}

/// Lazily observes an expired deadline: an open slot past its deadline moves
/// the record to MISSED and re-asserts the flag. The deadline itself is the
/// cancellation mechanism; nothing actively expires slots.
pub async fn observe_deadline(
    db: &DatabaseConnection,
    record: Record,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let open = record.reverify_status.is_some_and(|s| s.is_open());
    let due = record.reverify_deadline_at.is_some_and(|d| now >= d);
    if !(open && due) {
        return Ok(record);
    }

    let mut active: RecordActive = record.into_active_model();
    active.reverify_status = Set(Some(ReverifyStatus::Missed));
    active.flagged = Set(true);
    Ok(active.update(db).await?)
}

async fn fail_record(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    record: Record,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let mut active: RecordActive = record.into_active_model();
    active.reverify_status = Set(Some(ReverifyStatus::Failed));
    active.flagged = Set(true);
    let rec = active.update(db).await?;
    events.dispatch(AttendanceEvent::ReverifyOutcome {
        session_id: rec.session_id,
        user_id: rec.user_id,
        status: ReverifyStatus::Failed.to_string(),
        at: now,
    });
    Ok(rec)
}

/// Student-facing retry transition: MISSED → RETRY_PENDING with a fresh slot,
/// or terminal FAILED when attempt/retry caps or slot capacity are exhausted.
pub async fn request_retry(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: &Session,
    record: Record,
    capacity: i32,
    now: DateTime<Utc>,
) -> Result<RetryOutcome, EngineError> {
    let record = observe_deadline(db, record, now).await?;

    match record.reverify_status {
        None => Err(EngineError::NotSelected),
        Some(ReverifyStatus::Passed) | Some(ReverifyStatus::ManualPresent) => {
            Err(EngineError::SlotAlreadyUsed)
        }
        Some(ReverifyStatus::Failed) => Err(EngineError::ReverifyFailed),
        Some(ReverifyStatus::Pending) | Some(ReverifyStatus::RetryPending) => {
            Err(EngineError::SlotStillOpen)
        }
        Some(ReverifyStatus::Missed) => {
            let caps_exhausted = record.reverify_attempt_count
                >= config::reverify_max_attempts()
                || record.reverify_retry_count >= config::reverify_max_retries();
            if caps_exhausted {
                return Ok(RetryOutcome::Failed(fail_record(db, events, record, now).await?));
            }
            match assign_slot(db, events, session, record, capacity, now, true).await? {
                AssignOutcome::Assigned(rec) => Ok(RetryOutcome::NewSlot(rec)),
                AssignOutcome::NoCapacity(rec) => {
                    Ok(RetryOutcome::Failed(fail_record(db, events, rec, now).await?))
                }
            }
        }
    }
}

/// Staff spot check: force an already-marked student into REVERIFY with an
/// immediate near-term slot, independent of the random sample. Terminal
/// records are left untouched.
pub async fn target_student(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: &Session,
    record: Record,
    capacity: i32,
    now: DateTime<Utc>,
) -> Result<AssignOutcome, EngineError> {
    if record.reverify_status.is_some_and(|s| s.is_terminal()) {
        return Ok(AssignOutcome::NoCapacity(record));
    }
    assign_slot(db, events, session, record, capacity, now, false).await
}

/// Staff override: force MANUAL_PRESENT (terminal) and clear the flag.
pub async fn manual_present(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    record: Record,
    now: DateTime<Utc>,
) -> Result<Record, EngineError> {
    let mut active: RecordActive = record.into_active_model();
    active.reverify_status = Set(Some(ReverifyStatus::ManualPresent));
    active.reverify_manual_override = Set(true);
    active.reverify_marked_at = Set(Some(now));
    active.flagged = Set(false);
    let rec = active.update(db).await?;
    events.dispatch(AttendanceEvent::ReverifyOutcome {
        session_id: rec.session_id,
        user_id: rec.user_id,
        status: ReverifyStatus::ManualPresent.to_string(),
        at: now,
    });
    Ok(rec)
}

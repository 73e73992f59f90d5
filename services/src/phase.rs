//! Lazily-evaluated phase state machine.
//!
//! There is no background scheduler: every request that touches a session
//! calls [`sync`] first, which derives the phase from wall-clock time and
//! persists it as a cache. One-time side effects (the reverify sample, the
//! close-time finalization) are guarded by conditional updates so exactly one
//! concurrent caller performs them and the datastore provides the mutual
//! exclusion.

use chrono::{DateTime, Utc};
use common::events::{AttendanceEvent, EventDispatcher};
use db::models::attendance_record::{
    ActiveModel as RecordActive, Column as RecordCol, Entity as RecordEntity, ReverifyStatus,
};
use db::models::attendance_session::{
    ActiveModel as SessionActive, Column as SessionCol, Entity as SessionEntity, Model as Session,
    Phase, Status,
};
use db::models::{module, organization};
use rand::seq::SliceRandom;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::error::EngineError;
use crate::slots;

/// Loads the tenant row that owns a session's module.
pub async fn org_for_session(
    db: &DatabaseConnection,
    session: &Session,
) -> Result<organization::Model, EngineError> {
    let module = module::Entity::find_by_id(session.module_id)
        .one(db)
        .await?
        .ok_or(EngineError::SessionNotFound)?;
    organization::Entity::find_by_id(module.organization_id)
        .one(db)
        .await?
        .ok_or(EngineError::SessionNotFound)
}

async fn reload(db: &DatabaseConnection, id: i64) -> Result<Session, EngineError> {
    SessionEntity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(EngineError::SessionNotFound)
}

/// Brings a session's cached `phase`/`status` in line with the clock and runs
/// the one-time transition side effects. Every endpoint that reads or mutates
/// a session must call this first; a stale phase read is a correctness bug.
pub async fn sync(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: Session,
    now: DateTime<Utc>,
) -> Result<Session, EngineError> {
    match session.phase_at(now) {
        Phase::Initial => Ok(session),
        Phase::Reverify => {
            if session.phase != Phase::Reverify {
                SessionEntity::update_many()
                    .set(SessionActive {
                        phase: Set(Phase::Reverify),
                        updated_at: Set(now),
                        ..Default::default()
                    })
                    .filter(SessionCol::Id.eq(session.id))
                    .exec(db)
                    .await?;
            }
            if !session.reverify_selection_done {
                // Conditional claim: only the first concurrent caller samples.
                let claimed = SessionEntity::update_many()
                    .set(SessionActive {
                        reverify_selection_done: Set(true),
                        updated_at: Set(now),
                        ..Default::default()
                    })
                    .filter(SessionCol::Id.eq(session.id))
                    .filter(SessionCol::ReverifySelectionDone.eq(false))
                    .exec(db)
                    .await?;
                if claimed.rows_affected == 1 {
                    let selected = run_selection(db, events, &session, now).await?;
                    SessionEntity::update_many()
                        .set(SessionActive {
                            reverify_selected_count: Set(selected),
                            updated_at: Set(now),
                            ..Default::default()
                        })
                        .filter(SessionCol::Id.eq(session.id))
                        .exec(db)
                        .await?;
                    tracing::info!(
                        session_id = session.id,
                        selected,
                        "reverification sample selected"
                    );
                }
            }
            reload(db, session.id).await
        }
        Phase::Closed => {
            close(db, events, &session, now).await?;
            reload(db, session.id).await
        }
    }
}

/// Claims the ACTIVE→CLOSED transition; the winning caller finalizes every
/// non-terminal reverify record as FAILED (no capacity remains once the
/// window is over). Also used for the explicit staff close.
pub async fn close(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let claimed = SessionEntity::update_many()
        .set(SessionActive {
            status: Set(Status::Closed),
            phase: Set(Phase::Closed),
            closed_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(SessionCol::Id.eq(session.id))
        .filter(SessionCol::Status.eq(Status::Active))
        .exec(db)
        .await?;

    if claimed.rows_affected == 1 {
        RecordEntity::update_many()
            .set(RecordActive {
                reverify_status: Set(Some(ReverifyStatus::Failed)),
                flagged: Set(true),
                ..Default::default()
            })
            .filter(RecordCol::SessionId.eq(session.id))
            .filter(RecordCol::ReverifyStatus.is_in([
                ReverifyStatus::Pending,
                ReverifyStatus::RetryPending,
                ReverifyStatus::Missed,
            ]))
            .exec(db)
            .await?;
        events.dispatch(AttendanceEvent::SessionClosed {
            session_id: session.id,
            closed_at: now,
        });
    }
    Ok(())
}

/// Samples a uniform subset of marked students and assigns each an initial
/// slot (attempt 1). Runs exactly once per session, inside the selection
/// claim. Determinism is not required, only single execution.
async fn run_selection(
    db: &DatabaseConnection,
    events: &EventDispatcher,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<i32, EngineError> {
    let org = org_for_session(db, session).await?;
    let records = RecordEntity::find()
        .filter(RecordCol::SessionId.eq(session.id))
        .all(db)
        .await?;
    if records.is_empty() {
        return Ok(0);
    }

    let sample_size = sample_size(records.len(), org.reverify_sample_percent);
    let chosen = {
        let mut rng = rand::thread_rng();
        records
            .choose_multiple(&mut rng, sample_size)
            .cloned()
            .collect::<Vec<_>>()
    };

    let mut selected = 0;
    for record in chosen {
        match slots::assign_slot(
            db,
            events,
            session,
            record,
            org.reverify_slot_capacity,
            now,
            false,
        )
        .await?
        {
            slots::AssignOutcome::Assigned(_) => selected += 1,
            slots::AssignOutcome::NoCapacity(rec) => {
                // Window too small for the whole sample; remaining students
                // simply stay unselected.
                tracing::warn!(
                    session_id = session.id,
                    user_id = rec.user_id,
                    "reverify window out of capacity during selection"
                );
                break;
            }
        }
    }
    Ok(selected)
}

fn sample_size(total: usize, percent: i32) -> usize {
    let percent = percent.clamp(0, 100) as usize;
    if total == 0 || percent == 0 {
        return 0;
    }
    // ceiling division so a non-zero policy always samples at least one
    (total * percent).div_ceil(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_size_rounds_up() {
        assert_eq!(sample_size(0, 30), 0);
        assert_eq!(sample_size(1, 30), 1);
        assert_eq!(sample_size(3, 30), 1);
        assert_eq!(sample_size(10, 30), 3);
        assert_eq!(sample_size(11, 30), 4);
        assert_eq!(sample_size(200, 30), 60);
    }

    #[test]
    fn sample_size_handles_policy_extremes() {
        assert_eq!(sample_size(50, 0), 0);
        assert_eq!(sample_size(50, 100), 50);
        assert_eq!(sample_size(50, 250), 50);
    }
}

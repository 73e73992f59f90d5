//! Fire-and-forget engine events.
//!
//! The engine emits events for everything a notification pipeline would care
//! about (slot openings, reverify outcomes, session lifecycle). Delivery is
//! best-effort over an unbounded channel: a failed send is logged and dropped,
//! never surfaced to the caller, so a dead consumer can never fail an
//! allocation or a mark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted by the attendance engine for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AttendanceEvent {
    /// A student successfully marked attendance during the initial phase.
    AttendanceMarked {
        session_id: i64,
        user_id: i64,
        confidence: i32,
        flagged: bool,
        marked_at: DateTime<Utc>,
    },

    /// A reverification slot was assigned to a student.
    ReverifySlotOpened {
        session_id: i64,
        user_id: i64,
        slot_start: DateTime<Utc>,
        deadline: DateTime<Utc>,
        is_retry: bool,
    },

    /// A student's reverification reached a terminal or notable state.
    ReverifyOutcome {
        session_id: i64,
        user_id: i64,
        status: String,
        at: DateTime<Utc>,
    },

    /// A session transitioned to CLOSED (lazily observed or forced by staff).
    SessionClosed {
        session_id: i64,
        closed_at: DateTime<Utc>,
    },
}

/// Cloneable handle used by services to emit events.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<AttendanceEvent>,
}

impl EventDispatcher {
    /// Creates a dispatcher together with the receiving half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AttendanceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event. Never fails: if the receiver is gone the event is
    /// dropped with a warning.
    pub fn dispatch(&self, event: AttendanceEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::warn!(error = %err, "event receiver closed; dropping attendance event");
        }
    }
}

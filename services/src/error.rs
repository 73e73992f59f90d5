use db::models::attendance_session::Phase;
use sea_orm::DbErr;
use thiserror::Error;

/// Engine error taxonomy.
///
/// Everything except `Db` is client-correctable or a state conflict and maps
/// to a 4xx at the HTTP layer; `Db` is the only infrastructure failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Attendance session not found")]
    SessionNotFound,

    #[error("Attendance record not found")]
    RecordNotFound,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token not valid for your slot")]
    TokenNotForSlot,

    #[error("Session is in the {0} phase")]
    WrongPhase(Phase),

    #[error("Attendance already recorded")]
    AlreadyMarked,

    #[error("Not enrolled in this module")]
    NotEnrolled,

    #[error("Biometric verification required")]
    BiometricRequired,

    #[error("Not selected for reverification")]
    NotSelected,

    #[error("Reverification already completed")]
    SlotAlreadyUsed,

    #[error("Current slot is still open; submit before the deadline")]
    SlotStillOpen,

    #[error("Slot deadline passed; request a retry")]
    SlotMissed,

    #[error("Reverification failed")]
    ReverifyFailed,

    #[error("An active session already exists for this module")]
    DuplicateActiveSession { existing_id: i64 },

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl EngineError {
    /// True for conditions the client caused and can correct; these are never
    /// logged as server errors.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Db(_))
    }

    /// State conflicts point the losing caller at the winning resource.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateActiveSession { .. } | EngineError::AlreadyMarked
        )
    }
}

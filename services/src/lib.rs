//! Attendance verification engine.
//!
//! Everything that decides whether a student was physically present lives
//! here: the rotating token protocol, the geolocation evaluator, confidence
//! fusion, the lazily-evaluated phase state machine and the reverification
//! slot allocator. HTTP handlers in the `api` crate are thin wrappers around
//! the [`attendance`] facade.

pub mod attendance;
pub mod confidence;
pub mod error;
pub mod geolocation;
pub mod phase;
pub mod slots;
pub mod token;

pub use error::EngineError;

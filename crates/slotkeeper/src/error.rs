//! Error taxonomy for the slot engine.
//!
//! Recoverable per-entity failures (restore, save) are swallowed where the
//! protocol demands it and surface only as warnings plus unreset counters;
//! the types here cover the failures that propagate to callers.

use crate::types::EntityId;

/// Slot acquisition failure. The only variant is a configuration fault:
/// the backend reported zero slots. Fatal to the caller, never retried
/// internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("backend reports zero slots")]
    NoSlots,
}

/// Failure talking to the inference backend.
///
/// `Timeout` is distinct from other I/O failure so callers can tell a
/// bounded wait elapsing apart from a broken transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend request timed out")]
    Timeout,
    #[error("backend transport error: {0}")]
    Http(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// Failure of one generation turn. Aborts that turn only; never fatal to
/// the process except for the embedded configuration fault.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("no active entity to generate for")]
    NoEntity,
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("generation failed: {0}")]
    Backend(#[from] BackendError),
    #[error("generation timed out")]
    TimedOut,
    #[error("generation cancelled")]
    Cancelled,
}

/// Failure of an explicit slot save.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("entity {0} holds no slot")]
    NotResident(EntityId),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failure of the snapshot store collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot store I/O error: {0}")]
    Io(String),
    #[error("invalid snapshot name: {0}")]
    InvalidName(String),
}

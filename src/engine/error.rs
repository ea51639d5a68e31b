use thiserror::Error;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// Ledger debit would take `available` below zero.
    #[error("insufficient capacity on slot {slot_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        slot_id: Ulid,
        requested: u32,
        available: u32,
    },
    /// Bookings plus active holds would exceed the ceiling.
    #[error("slot {slot_id} is full: requested {requested}, booked {booked}, held {held}, total {total}")]
    SlotFull {
        slot_id: Ulid,
        requested: u32,
        booked: u32,
        held: u32,
        total: u32,
    },
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("lock not found: {0}")]
    LockNotFound(Ulid),
    #[error("lock expired: {0}")]
    LockExpired(Ulid),
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Ulid, expected: u64, actual: u64 },
    #[error("cannot delete slot {0}: has outstanding bookings")]
    HasOutstandingBookings(Ulid),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Lock misses are expected during checkout and never a hard failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, EngineError::LockNotFound(_) | EngineError::LockExpired(_))
    }

    /// The requested time can no longer be sold.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientCapacity { .. } | EngineError::SlotFull { .. }
        )
    }

    /// Stale client state: the caller should refresh and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidTransition { .. } | EngineError::VersionConflict { .. }
        )
    }
}

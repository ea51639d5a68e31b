use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }
}

// ── Capacity ledger ──────────────────────────────────────────────

/// Per-slot capacity counters. Copied, mutated, then written back as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLedger {
    /// Current ceiling.
    pub total: u32,
    /// Units that can still be sold.
    pub available: u32,
    /// Units committed to consuming bookings.
    pub booked: u32,
    /// Highest ceiling this slot ever had.
    pub original: u32,
}

impl SlotLedger {
    /// A freshly generated slot: everything available, nothing booked.
    pub fn new(capacity: u32) -> Self {
        Self {
            total: capacity,
            available: capacity,
            booked: 0,
            original: capacity,
        }
    }

    /// Committed bookings exceed the current ceiling.
    pub fn is_overbooked(&self) -> bool {
        self.booked > self.total
    }

    /// `available + booked == total`; holds unless the ceiling was cut below `booked`.
    pub fn is_conserved(&self) -> bool {
        u64::from(self.available) + u64::from(self.booked) == u64::from(self.total)
    }
}

// ── Reservation locks ────────────────────────────────────────────

/// Temporary claim on slot capacity held by one checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLock {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub session_id: String,
    pub reserved_capacity: u32,
    pub acquired_at: Ms,
    pub expires_at: Ms,
}

impl ReservationLock {
    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// States in which the booking's visitors are debited from the slot.
    pub fn holds_capacity(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked_in" => Ok(BookingStatus::CheckedIn),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            "no_show" => Ok(BookingStatus::NoShow),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "partially_paid" | "partial" => Ok(PaymentStatus::PartiallyPaid),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A customer's claim against a slot. Bookings are what consume capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub service_id: Ulid,
    pub visitor_count: u32,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub subscription_id: Option<Ulid>,
    /// Units drawn from the package at creation.
    pub package_covered: u32,
    /// Bumped on every committed change; used for optimistic concurrency.
    pub version: u64,
    pub created_at: Ms,
}

impl Booking {
    /// Units billed outside the package.
    pub fn paid_quantity(&self) -> u32 {
        self.visitor_count - self.package_covered
    }
}

// ── Package usage ────────────────────────────────────────────────

/// Quota counters for one (subscription, service) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub original: u32,
    pub remaining: u32,
    pub used: u32,
}

impl UsageCounters {
    pub fn new(quantity: u32) -> Self {
        Self {
            original: quantity,
            remaining: quantity,
            used: 0,
        }
    }

    pub fn is_balanced(&self) -> bool {
        u64::from(self.remaining) + u64::from(self.used) == u64::from(self.original)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageKey {
    pub subscription_id: Ulid,
    pub service_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUsage {
    pub key: UsageKey,
    pub counters: UsageCounters,
}

/// The event types. Flat, no nesting; this is the WAL record format.
///
/// Mutating events carry the resulting ledger/usage snapshot, so replay is a
/// plain assignment and never re-runs validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        service_id: Ulid,
        span: Span,
        ledger: SlotLedger,
    },
    SlotCapacityChanged {
        id: Ulid,
        ledger: SlotLedger,
    },
    SlotDeleted {
        id: Ulid,
    },
    LockAcquired {
        lock: ReservationLock,
    },
    LockExtended {
        id: Ulid,
        slot_id: Ulid,
        expires_at: Ms,
    },
    LockReleased {
        id: Ulid,
        slot_id: Ulid,
    },
    UsageCreated {
        key: UsageKey,
        counters: UsageCounters,
    },
    BookingCreated {
        booking: Booking,
        ledger: SlotLedger,
        usage: Option<UsageCounters>,
        released_lock: Option<Ulid>,
    },
    BookingTransitioned {
        id: Ulid,
        slot_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
        version: u64,
        ledger: SlotLedger,
        usage: Option<UsageCounters>,
    },
    PaymentStatusChanged {
        id: Ulid,
        slot_id: Ulid,
        payment_status: PaymentStatus,
        version: u64,
    },
}

impl Event {
    /// Slot the event belongs to, if any.
    pub fn slot_id(&self) -> Option<Ulid> {
        match self {
            Event::SlotCreated { id, .. }
            | Event::SlotCapacityChanged { id, .. }
            | Event::SlotDeleted { id } => Some(*id),
            Event::LockAcquired { lock } => Some(lock.slot_id),
            Event::LockExtended { slot_id, .. }
            | Event::LockReleased { slot_id, .. }
            | Event::BookingTransitioned { slot_id, .. }
            | Event::PaymentStatusChanged { slot_id, .. } => Some(*slot_id),
            Event::BookingCreated { booking, .. } => Some(booking.slot_id),
            Event::UsageCreated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub total_capacity: u32,
    pub available_capacity: u32,
    pub booked_count: u32,
    pub original_capacity: u32,
    pub is_overbooked: bool,
    /// Units held by active reservation locks.
    pub held: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn fresh_ledger_is_conserved() {
        let l = SlotLedger::new(8);
        assert!(l.is_conserved());
        assert!(!l.is_overbooked());
        assert_eq!(l.available, 8);
        assert_eq!(l.original, 8);
    }

    #[test]
    fn overbooked_when_booked_exceeds_total() {
        let l = SlotLedger {
            total: 2,
            available: 0,
            booked: 3,
            original: 5,
        };
        assert!(l.is_overbooked());
        assert!(!l.is_conserved());
    }

    #[test]
    fn lock_expiry_is_exclusive() {
        let lock = ReservationLock {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            session_id: "s".into(),
            reserved_capacity: 1,
            acquired_at: 0,
            expires_at: 1000,
        };
        assert!(lock.is_active(999));
        assert!(!lock.is_active(1000));
    }

    #[test]
    fn status_parse_and_display() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::CheckedIn,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::NoShow,
        ] {
            assert_eq!(s.as_str().parse::<BookingStatus>().unwrap(), s);
        }
        assert_eq!("CANCELED".parse::<BookingStatus>().unwrap(), BookingStatus::Cancelled);
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn terminal_and_consuming_states() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
        assert!(!BookingStatus::CheckedIn.is_terminal());
        assert!(BookingStatus::CheckedIn.holds_capacity());
        assert!(!BookingStatus::Pending.holds_capacity());
    }

    #[test]
    fn paid_quantity_is_remainder() {
        let b = Booking {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            service_id: Ulid::new(),
            visitor_count: 3,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            subscription_id: Some(Ulid::new()),
            package_covered: 2,
            version: 1,
            created_at: 0,
        };
        assert_eq!(b.paid_quantity(), 1);
    }

    #[test]
    fn event_slot_id() {
        let sid = Ulid::new();
        let e = Event::LockReleased { id: Ulid::new(), slot_id: sid };
        assert_eq!(e.slot_id(), Some(sid));
        let u = Event::UsageCreated {
            key: UsageKey { subscription_id: Ulid::new(), service_id: Ulid::new() },
            counters: UsageCounters::new(3),
        };
        assert_eq!(u.slot_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SlotCreated {
            id: Ulid::new(),
            service_id: Ulid::new(),
            span: Span::new(0, 1000),
            ledger: SlotLedger::new(4),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

//! Capacity Ledger: pure counter arithmetic on a [`SlotLedger`].
//!
//! Callers hold the slot's write lock and work on a copy; the copy is written
//! back only after every step of the surrounding transition succeeded.

use ulid::Ulid;

use crate::model::SlotLedger;

use super::EngineError;

/// Move `units` from available to booked.
pub(crate) fn debit(ledger: &mut SlotLedger, slot_id: Ulid, units: u32) -> Result<(), EngineError> {
    if ledger.available < units {
        return Err(EngineError::InsufficientCapacity {
            slot_id,
            requested: units,
            available: ledger.available,
        });
    }
    ledger.available -= units;
    ledger.booked = ledger
        .booked
        .checked_add(units)
        .ok_or(EngineError::LimitExceeded("booked count overflow"))?;
    Ok(())
}

/// Return `units` from booked to available.
///
/// `booked` clamps at zero, and `available` never rises above what the
/// ceiling leaves once the remaining bookings are counted.
pub(crate) fn credit(ledger: &mut SlotLedger, units: u32) {
    let booked_after = ledger.booked.saturating_sub(units);
    let ceiling = ledger.original.min(ledger.total);
    let cap = ceiling.saturating_sub(booked_after);
    ledger.available = ledger.available.saturating_add(units).min(cap);
    ledger.booked = booked_after;
}

/// Lower the ceiling. Existing bookings stay; an excess shows up as overbooked.
pub(crate) fn reduce_ceiling(ledger: &mut SlotLedger, new_total: u32) -> Result<(), EngineError> {
    if new_total > ledger.total {
        return Err(EngineError::InvalidArgument("reduce_ceiling above current total"));
    }
    ledger.total = new_total;
    ledger.available = new_total.saturating_sub(ledger.booked);
    Ok(())
}

/// Raise the ceiling; `original` tracks the highest ceiling ever set.
pub(crate) fn raise_ceiling(ledger: &mut SlotLedger, new_total: u32) -> Result<(), EngineError> {
    if new_total < ledger.total {
        return Err(EngineError::InvalidArgument("raise_ceiling below current total"));
    }
    ledger.total = new_total;
    ledger.original = ledger.original.max(new_total);
    ledger.available = new_total.saturating_sub(ledger.booked);
    Ok(())
}

/// Admin capacity edit: dispatch to reduce or raise.
pub(crate) fn set_ceiling(ledger: &mut SlotLedger, new_total: u32) -> Result<(), EngineError> {
    if new_total < ledger.total {
        reduce_ceiling(ledger, new_total)
    } else {
        raise_ceiling(ledger, new_total)
    }
}

/// Would `units` more fit once bookings and other sessions' holds are counted?
pub(crate) fn check_hold_room(
    ledger: &SlotLedger,
    slot_id: Ulid,
    held: u32,
    units: u32,
) -> Result<(), EngineError> {
    let demand = u64::from(ledger.booked) + u64::from(held) + u64::from(units);
    if demand > u64::from(ledger.total) {
        return Err(EngineError::SlotFull {
            slot_id,
            requested: units,
            booked: ledger.booked,
            held,
            total: ledger.total,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> Ulid {
        Ulid::new()
    }

    #[test]
    fn debit_moves_units() {
        let mut l = SlotLedger::new(5);
        debit(&mut l, sid(), 3).unwrap();
        assert_eq!((l.available, l.booked), (2, 3));
        assert!(l.is_conserved());
    }

    #[test]
    fn debit_rejects_when_short() {
        let mut l = SlotLedger::new(2);
        let err = debit(&mut l, sid(), 3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientCapacity { requested: 3, available: 2, .. }
        ));
        // untouched
        assert_eq!(l, SlotLedger::new(2));
    }

    #[test]
    fn debit_exact_fill() {
        let mut l = SlotLedger::new(2);
        debit(&mut l, sid(), 2).unwrap();
        assert_eq!(l.available, 0);
        assert!(debit(&mut l, sid(), 1).is_err());
    }

    #[test]
    fn credit_is_inverse_of_debit() {
        let mut l = SlotLedger::new(6);
        debit(&mut l, sid(), 4).unwrap();
        credit(&mut l, 4);
        assert_eq!(l, SlotLedger::new(6));
    }

    #[test]
    fn credit_clamps_booked_at_zero() {
        let mut l = SlotLedger::new(3);
        debit(&mut l, sid(), 1).unwrap();
        credit(&mut l, 5);
        assert_eq!(l.booked, 0);
        assert_eq!(l.available, 3);
    }

    #[test]
    fn credit_after_reduction_never_resells_excess() {
        let mut l = SlotLedger::new(3);
        debit(&mut l, sid(), 3).unwrap();
        reduce_ceiling(&mut l, 1).unwrap();
        assert!(l.is_overbooked());
        assert_eq!(l.available, 0);

        credit(&mut l, 1);
        // still 2 booked against a ceiling of 1
        assert_eq!((l.available, l.booked), (0, 2));
        assert!(l.is_overbooked());

        credit(&mut l, 2);
        assert_eq!((l.available, l.booked), (1, 0));
        assert!(!l.is_overbooked());
    }

    #[test]
    fn reduce_flags_overbooked() {
        let mut l = SlotLedger::new(4);
        debit(&mut l, sid(), 3).unwrap();
        reduce_ceiling(&mut l, 2).unwrap();
        assert_eq!(l.total, 2);
        assert_eq!(l.original, 4);
        assert_eq!(l.booked, 3);
        assert!(l.is_overbooked());
    }

    #[test]
    fn reduce_above_booked_keeps_conservation() {
        let mut l = SlotLedger::new(10);
        debit(&mut l, sid(), 3).unwrap();
        reduce_ceiling(&mut l, 5).unwrap();
        assert_eq!(l.available, 2);
        assert!(l.is_conserved());
        assert!(!l.is_overbooked());
    }

    #[test]
    fn raise_updates_original() {
        let mut l = SlotLedger::new(2);
        debit(&mut l, sid(), 2).unwrap();
        raise_ceiling(&mut l, 5).unwrap();
        assert_eq!((l.total, l.available, l.original), (5, 3, 5));
    }

    #[test]
    fn set_ceiling_round_trip_clears_overbooked() {
        let mut l = SlotLedger::new(4);
        debit(&mut l, sid(), 4).unwrap();
        set_ceiling(&mut l, 2).unwrap();
        assert!(l.is_overbooked());
        set_ceiling(&mut l, 4).unwrap();
        assert!(!l.is_overbooked());
        assert!(l.is_conserved());
    }

    #[test]
    fn hold_room_counts_booked_and_held() {
        let mut l = SlotLedger::new(3);
        debit(&mut l, sid(), 1).unwrap();
        assert!(check_hold_room(&l, sid(), 1, 1).is_ok());
        assert!(matches!(
            check_hold_room(&l, sid(), 2, 1),
            Err(EngineError::SlotFull { booked: 1, held: 2, total: 3, .. })
        ));
    }
}

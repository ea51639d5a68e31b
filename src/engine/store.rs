use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

pub type SharedSlotState = Arc<RwLock<SlotState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;
pub type SharedUsage = Arc<Mutex<PackageUsage>>;

/// One slot's ledger plus the holds and bookings that reference it.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
    pub ledger: SlotLedger,
    /// Reservation locks, expired ones included until swept.
    pub locks: Vec<ReservationLock>,
    /// Every booking ever made against this slot.
    pub bookings: Vec<Ulid>,
    /// Bookings not yet in a terminal state.
    pub outstanding: HashSet<Ulid>,
    /// Set once the slot is deleted; waiters that already hold the Arc bail out.
    pub deleted: bool,
}

impl SlotState {
    pub fn new(id: Ulid, service_id: Ulid, span: Span, ledger: SlotLedger) -> Self {
        Self {
            id,
            service_id,
            span,
            ledger,
            locks: Vec::new(),
            bookings: Vec::new(),
            outstanding: HashSet::new(),
            deleted: false,
        }
    }

    /// Units held by locks still active at `now`.
    pub fn held(&self, now: Ms) -> u32 {
        self.held_excluding(now, None)
    }

    pub fn held_excluding(&self, now: Ms, exclude: Option<Ulid>) -> u32 {
        self.locks
            .iter()
            .filter(|l| l.is_active(now) && Some(l.id) != exclude)
            .fold(0u32, |acc, l| acc.saturating_add(l.reserved_capacity))
    }

    pub fn lock(&self, id: Ulid) -> Option<&ReservationLock> {
        self.locks.iter().find(|l| l.id == id)
    }

    /// The session's active hold on this slot, if any.
    pub fn session_lock(&self, session_id: &str, now: Ms) -> Option<&ReservationLock> {
        self.locks
            .iter()
            .find(|l| l.session_id == session_id && l.is_active(now))
    }

    pub fn active_locks(&self, now: Ms) -> impl Iterator<Item = &ReservationLock> {
        self.locks.iter().filter(move |l| l.is_active(now))
    }

    fn upsert_lock(&mut self, lock: ReservationLock) {
        match self.locks.iter_mut().find(|l| l.id == lock.id) {
            Some(existing) => *existing = lock,
            None => self.locks.push(lock),
        }
    }

    fn remove_lock(&mut self, id: Ulid) -> Option<ReservationLock> {
        let pos = self.locks.iter().position(|l| l.id == id)?;
        Some(self.locks.swap_remove(pos))
    }

    pub fn info(&self, now: Ms) -> SlotInfo {
        SlotInfo {
            id: self.id,
            service_id: self.service_id,
            start: self.span.start,
            end: self.span.end,
            total_capacity: self.ledger.total,
            available_capacity: self.ledger.available,
            booked_count: self.ledger.booked,
            original_capacity: self.ledger.original,
            is_overbooked: self.ledger.is_overbooked(),
            held: self.held(now),
        }
    }

    /// Apply a slot-scoped event (caller holds the write lock).
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SlotCapacityChanged { ledger, .. } => self.ledger = *ledger,
            Event::LockAcquired { lock } => self.upsert_lock(lock.clone()),
            Event::LockExtended { id, expires_at, .. } => {
                if let Some(lock) = self.locks.iter_mut().find(|l| l.id == *id) {
                    lock.expires_at = *expires_at;
                }
            }
            Event::LockReleased { id, .. } => {
                self.remove_lock(*id);
            }
            Event::BookingCreated {
                booking,
                ledger,
                released_lock,
                ..
            } => {
                self.ledger = *ledger;
                if !self.bookings.contains(&booking.id) {
                    self.bookings.push(booking.id);
                }
                if !booking.status.is_terminal() {
                    self.outstanding.insert(booking.id);
                }
                if let Some(lock_id) = released_lock {
                    self.remove_lock(*lock_id);
                }
            }
            Event::BookingTransitioned { id, to, ledger, .. } => {
                self.ledger = *ledger;
                if to.is_terminal() {
                    self.outstanding.remove(id);
                }
            }
            Event::SlotCreated { .. }
            | Event::SlotDeleted { .. }
            | Event::UsageCreated { .. }
            | Event::PaymentStatusChanged { .. } => {}
        }
    }
}

/// Apply a booking-scoped event to its record.
pub fn apply_to_booking(booking: &mut Booking, event: &Event) {
    match event {
        Event::BookingTransitioned { to, version, .. } => {
            booking.status = *to;
            booking.version = *version;
        }
        Event::PaymentStatusChanged {
            payment_status,
            version,
            ..
        } => {
            booking.payment_status = *payment_status;
            booking.version = *version;
        }
        _ => {}
    }
}

/// Exclusive right to create one key, held from the duplicate check until
/// the new row is in the store. Released on drop.
pub struct Claim<'a, K: Eq + Hash> {
    set: &'a DashSet<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for Claim<'_, K> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

fn claim<K: Eq + Hash + Clone>(set: &DashSet<K>, key: K) -> Option<Claim<'_, K>> {
    set.insert(key.clone()).then_some(Claim { set, key })
}

/// Materialized engine state, rebuilt from the journal.
#[derive(Default)]
pub struct Store {
    slots: DashMap<Ulid, SharedSlotState>,
    bookings: DashMap<Ulid, SharedBooking>,
    usage: DashMap<UsageKey, SharedUsage>,
    /// Reverse lookup: lock id → slot id.
    lock_to_slot: DashMap<Ulid, Ulid>,
    /// Keys with a create in flight.
    slot_claims: DashSet<Ulid>,
    booking_claims: DashSet<Ulid>,
    usage_claims: DashSet<UsageKey>,
    lock_claims: DashSet<Ulid>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Slots ────────────────────────────────────────────────

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains_slot(&self, id: &Ulid) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    /// Claim a slot id for creation. `None` while another create holds it;
    /// the caller re-checks `contains_slot` after claiming.
    pub fn claim_slot(&self, id: Ulid) -> Option<Claim<'_, Ulid>> {
        claim(&self.slot_claims, id)
    }

    pub fn insert_slot(&self, state: SlotState) {
        self.slots.insert(state.id, Arc::new(RwLock::new(state)));
    }

    pub fn slot_handles(&self) -> Vec<SharedSlotState> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }

    /// Drop a slot together with its lock index entries and booking history.
    pub fn remove_slot(&self, state: &SlotState) {
        for lock in &state.locks {
            self.lock_to_slot.remove(&lock.id);
        }
        for booking_id in &state.bookings {
            self.bookings.remove(booking_id);
        }
        self.slots.remove(&state.id);
    }

    // ── Lock index ───────────────────────────────────────────

    pub fn slot_for_lock(&self, lock_id: &Ulid) -> Option<Ulid> {
        self.lock_to_slot.get(lock_id).map(|e| *e.value())
    }

    pub fn claim_lock(&self, lock_id: Ulid) -> Option<Claim<'_, Ulid>> {
        claim(&self.lock_claims, lock_id)
    }

    pub fn map_lock(&self, lock_id: Ulid, slot_id: Ulid) {
        self.lock_to_slot.insert(lock_id, slot_id);
    }

    pub fn unmap_lock(&self, lock_id: &Ulid) {
        self.lock_to_slot.remove(lock_id);
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn contains_booking(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn claim_booking(&self, id: Ulid) -> Option<Claim<'_, Ulid>> {
        claim(&self.booking_claims, id)
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, Arc::new(Mutex::new(booking)));
    }

    pub fn booking_handles(&self) -> Vec<SharedBooking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    // ── Package usage ────────────────────────────────────────

    pub fn contains_usage(&self, key: &UsageKey) -> bool {
        self.usage.contains_key(key)
    }

    pub fn get_usage(&self, key: &UsageKey) -> Option<SharedUsage> {
        self.usage.get(key).map(|e| e.value().clone())
    }

    pub fn claim_usage(&self, key: UsageKey) -> Option<Claim<'_, UsageKey>> {
        claim(&self.usage_claims, key)
    }

    pub fn insert_usage(&self, usage: PackageUsage) {
        self.usage.insert(usage.key, Arc::new(Mutex::new(usage)));
    }

    pub fn usage_for_subscription(&self, subscription_id: &Ulid) -> Vec<SharedUsage> {
        self.usage
            .iter()
            .filter(|e| e.key().subscription_id == *subscription_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn usage_handles(&self) -> Vec<SharedUsage> {
        self.usage.iter().map(|e| e.value().clone()).collect()
    }

    // ── Replay ───────────────────────────────────────────────

    /// Apply one journaled event during startup. We are the sole owner of
    /// every Arc here, so `Arc::get_mut` always succeeds; nothing blocks.
    pub fn replay_event(&self, event: &Event) {
        match event {
            Event::SlotCreated {
                id,
                service_id,
                span,
                ledger,
            } => self.insert_slot(SlotState::new(*id, *service_id, *span, *ledger)),
            Event::SlotDeleted { id } => {
                if let Some((_, arc)) = self.slots.remove(id) {
                    let state = arc.try_read().map(|g| g.clone());
                    if let Ok(state) = state {
                        self.remove_slot(&state);
                    }
                }
            }
            Event::UsageCreated { key, counters } => self.insert_usage(PackageUsage {
                key: *key,
                counters: *counters,
            }),
            Event::PaymentStatusChanged { id, .. } => self.replay_booking(id, event),
            _ => self.replay_slot_scoped(event),
        }
    }

    fn replay_slot_scoped(&self, event: &Event) {
        let Some(slot_id) = event.slot_id() else { return };
        let Some(mut entry) = self.slots.get_mut(&slot_id) else {
            warn!(%slot_id, "replay: event for unknown slot skipped");
            return;
        };
        let Some(slot) = Arc::get_mut(entry.value_mut()) else {
            warn!(%slot_id, "replay: slot state shared, event skipped");
            return;
        };
        let slot = slot.get_mut();
        slot.apply(event);
        let service_id = slot.service_id;
        drop(entry);

        match event {
            Event::LockAcquired { lock } => self.map_lock(lock.id, lock.slot_id),
            Event::LockReleased { id, .. } => self.unmap_lock(id),
            Event::BookingCreated {
                booking,
                usage,
                released_lock,
                ..
            } => {
                if let Some(lock_id) = released_lock {
                    self.unmap_lock(lock_id);
                }
                if let (Some(subscription_id), Some(counters)) = (booking.subscription_id, usage) {
                    self.replay_usage(&UsageKey { subscription_id, service_id }, *counters);
                }
                self.insert_booking(booking.clone());
            }
            Event::BookingTransitioned { id, usage, .. } => {
                self.replay_booking(id, event);
                if let Some(counters) = usage {
                    let subscription_id = self
                        .bookings
                        .get(id)
                        .and_then(|b| b.value().try_lock().ok().and_then(|g| g.subscription_id));
                    if let Some(subscription_id) = subscription_id {
                        self.replay_usage(&UsageKey { subscription_id, service_id }, *counters);
                    }
                }
            }
            _ => {}
        }
    }

    fn replay_booking(&self, id: &Ulid, event: &Event) {
        if let Some(mut entry) = self.bookings.get_mut(id)
            && let Some(booking) = Arc::get_mut(entry.value_mut())
        {
            apply_to_booking(booking.get_mut(), event);
        }
    }

    fn replay_usage(&self, key: &UsageKey, counters: UsageCounters) {
        if let Some(mut entry) = self.usage.get_mut(key)
            && let Some(usage) = Arc::get_mut(entry.value_mut())
        {
            usage.get_mut().counters = counters;
        }
    }
}

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_slot(&self, id: &Ulid) -> Option<SlotInfo> {
        let slot = self.store.get_slot(id)?;
        let guard = slot.read().await;
        Some(guard.info(self.now_ms()))
    }

    /// All slots, ordered by start time.
    pub async fn list_slots(&self) -> Vec<SlotInfo> {
        let now = self.now_ms();
        let mut out = Vec::with_capacity(self.store.slot_count());
        for slot in self.store.slot_handles() {
            let guard = slot.read().await;
            if !guard.deleted {
                out.push(guard.info(now));
            }
        }
        out.sort_by_key(|s| (s.start, s.id));
        out
    }

    /// Active locks on a slot.
    pub async fn locks_for_slot(&self, slot_id: &Ulid) -> Result<Vec<ReservationLock>, EngineError> {
        let slot = self.slot_handle(slot_id)?;
        let guard = slot.read().await;
        let mut locks: Vec<_> = guard.active_locks(self.now_ms()).cloned().collect();
        locks.sort_by_key(|l| l.id);
        Ok(locks)
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let booking = self.store.get_booking(id)?;
        let guard = booking.lock().await;
        Some(guard.clone())
    }

    pub async fn bookings_for_slot(&self, slot_id: &Ulid) -> Result<Vec<Booking>, EngineError> {
        let slot = self.slot_handle(slot_id)?;
        // Never hold the slot guard while taking booking locks.
        let ids = slot.read().await.bookings.clone();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(b) = self.get_booking(&id).await {
                out.push(b);
            }
        }
        Ok(out)
    }

    pub async fn list_bookings(&self) -> Vec<Booking> {
        let mut out = Vec::new();
        for handle in self.store.booking_handles() {
            out.push(handle.lock().await.clone());
        }
        out.sort_by_key(|b| b.id);
        out
    }

    pub async fn get_package_usage(&self, key: &UsageKey) -> Option<PackageUsage> {
        let usage = self.store.get_usage(key)?;
        let guard = usage.lock().await;
        Some(guard.clone())
    }

    /// Every per-service quota of one subscription.
    pub async fn usage_for_subscription(&self, subscription_id: &Ulid) -> Vec<PackageUsage> {
        let mut out = Vec::new();
        for handle in self.store.usage_for_subscription(subscription_id) {
            out.push(handle.lock().await.clone());
        }
        out.sort_by_key(|u| u.key);
        out
    }
}

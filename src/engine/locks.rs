//! Reservation Lock Manager.
//!
//! Locks are soft holds keyed by checkout session. A held unit is only ever
//! counted while `expires_at > now`, so an expired lock stops blocking
//! others the moment it lapses, whether or not the sweeper has got to it.

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{ledger, Engine, EngineError};

impl Engine {
    /// Hold `units` of a slot for a checkout session.
    ///
    /// One active lock per (slot, session): acquiring again with the same id
    /// replaces the session's earlier hold. A different id while that hold is
    /// active is `AlreadyExists` carrying the id of the live lock.
    pub async fn acquire_lock(
        &self,
        id: Ulid,
        slot_id: Ulid,
        session_id: &str,
        units: u32,
        ttl_ms: Option<Ms>,
    ) -> Result<ReservationLock, EngineError> {
        if units == 0 {
            return Err(EngineError::InvalidArgument("lock must reserve at least one unit"));
        }
        if units > MAX_VISITOR_COUNT {
            return Err(EngineError::LimitExceeded("too many units in one lock"));
        }
        if session_id.is_empty() {
            return Err(EngineError::InvalidArgument("session id required"));
        }
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(EngineError::LimitExceeded("session id too long"));
        }
        let ttl = self
            .config
            .lock_ttl(ttl_ms)
            .ok_or(EngineError::InvalidArgument("lock ttl must be positive"))?;

        let _gate = self.commit_gate.read().await;
        let slot = self.slot_handle(&slot_id)?;
        let mut guard = self.live(&slot, slot_id).await?;
        let now = self.now_ms();

        let existing = guard.session_lock(session_id, now).map(|l| l.id);
        let _claim = match existing {
            Some(existing) if existing == id => None,
            Some(existing) => return Err(EngineError::AlreadyExists(existing)),
            None => {
                let claim = self.store.claim_lock(id).ok_or(EngineError::AlreadyExists(id))?;
                if self.store.slot_for_lock(&id).is_some() {
                    return Err(EngineError::AlreadyExists(id));
                }
                if guard.locks.len() >= MAX_LOCKS_PER_SLOT {
                    return Err(EngineError::LimitExceeded("too many locks on slot"));
                }
                Some(claim)
            }
        };

        let held = guard.held_excluding(now, existing);
        if let Err(e) = ledger::check_hold_room(&guard.ledger, slot_id, held, units) {
            metrics::counter!(crate::observability::LOCKS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }

        let lock = ReservationLock {
            id,
            slot_id,
            session_id: session_id.to_string(),
            reserved_capacity: units,
            acquired_at: now,
            expires_at: now.saturating_add(ttl),
        };
        let event = Event::LockAcquired { lock: lock.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        self.store.map_lock(id, slot_id);
        metrics::counter!(crate::observability::LOCKS_ACQUIRED_TOTAL).increment(1);
        Ok(lock)
    }

    /// Drop a lock. Unknown or already-removed ids succeed with `false`.
    pub async fn release_lock(&self, id: Ulid) -> Result<bool, EngineError> {
        self.release_where(id, |_| true).await
    }

    /// Release only if the lock is still expired at `now`; a lock extended
    /// since the sweep collected it survives.
    pub async fn release_expired_lock(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        self.release_where(id, |lock| !lock.is_active(now)).await
    }

    async fn release_where(
        &self,
        id: Ulid,
        pred: impl Fn(&ReservationLock) -> bool,
    ) -> Result<bool, EngineError> {
        let Some(slot_id) = self.store.slot_for_lock(&id) else {
            debug!(lock_id = %id, "release of unknown lock");
            return Ok(false);
        };
        let Some(slot) = self.store.get_slot(&slot_id) else {
            self.store.unmap_lock(&id);
            return Ok(false);
        };

        let _gate = self.commit_gate.read().await;
        let Ok(mut guard) = self.live(&slot, slot_id).await else {
            return Ok(false);
        };
        match guard.lock(id) {
            Some(lock) if pred(lock) => {}
            _ => return Ok(false),
        }

        let event = Event::LockReleased { id, slot_id };
        self.persist_and_apply(&mut guard, &event).await?;
        self.store.unmap_lock(&id);
        Ok(true)
    }

    /// Push a lock's expiry to `now + ttl`.
    pub async fn extend_lock(&self, id: Ulid, ttl_ms: Option<Ms>) -> Result<ReservationLock, EngineError> {
        let ttl = self
            .config
            .lock_ttl(ttl_ms)
            .ok_or(EngineError::InvalidArgument("lock ttl must be positive"))?;
        let slot_id = self
            .store
            .slot_for_lock(&id)
            .ok_or(EngineError::LockNotFound(id))?;
        let slot = self.store.get_slot(&slot_id).ok_or(EngineError::LockNotFound(id))?;

        let _gate = self.commit_gate.read().await;
        let mut guard = self
            .live(&slot, slot_id)
            .await
            .map_err(|_| EngineError::LockNotFound(id))?;
        let now = self.now_ms();
        let Some(lock) = guard.lock(id) else {
            return Err(EngineError::LockNotFound(id));
        };
        if !lock.is_active(now) {
            return Err(EngineError::LockExpired(id));
        }
        let mut lock = lock.clone();
        lock.expires_at = now.saturating_add(ttl);

        let event = Event::LockExtended {
            id,
            slot_id,
            expires_at: lock.expires_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(lock)
    }

    /// Units currently held by active locks on a slot.
    pub async fn active_hold_total(&self, slot_id: Ulid) -> Result<u32, EngineError> {
        let slot = self.slot_handle(&slot_id)?;
        let guard = slot.read().await;
        Ok(guard.held(self.now_ms()))
    }

    /// (lock_id, slot_id) pairs expired at `now`. Skips slots busy right now;
    /// the next sweep picks them up.
    pub fn collect_expired_locks(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for slot in self.store.slot_handles() {
            if let Ok(guard) = slot.try_read() {
                for lock in &guard.locks {
                    if !lock.is_active(now) {
                        expired.push((lock.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// One sweeper pass. Returns how many locks were removed.
    pub async fn sweep_expired_locks(&self) -> usize {
        let now = self.now_ms();
        let mut swept = 0;
        for (lock_id, slot_id) in self.collect_expired_locks(now) {
            match self.release_expired_lock(lock_id, now).await {
                Ok(true) => {
                    swept += 1;
                    info!(%lock_id, %slot_id, "swept expired lock");
                }
                Ok(false) => {}
                Err(e) => debug!(%lock_id, "sweep skip: {e}"),
            }
        }
        if swept > 0 {
            metrics::counter!(crate::observability::LOCKS_SWEPT_TOTAL).increment(swept as u64);
        }
        swept
    }
}

use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::SlotState;
use super::{ledger, Engine, EngineError};

pub(super) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidArgument("slot start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("slot too long"));
    }
    Ok(())
}

fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity > MAX_SLOT_CAPACITY {
        return Err(EngineError::LimitExceeded("slot capacity too large"));
    }
    Ok(())
}

impl Engine {
    /// Generate a slot with its full capacity available.
    pub async fn create_slot(
        &self,
        id: Ulid,
        service_id: Ulid,
        span: Span,
        capacity: u32,
    ) -> Result<SlotInfo, EngineError> {
        validate_span(&span)?;
        validate_capacity(capacity)?;
        if capacity == 0 {
            return Err(EngineError::InvalidArgument("slot capacity must be positive"));
        }
        if self.store.slot_count() >= MAX_SLOTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many slots"));
        }

        let _gate = self.commit_gate.read().await;
        // Held until the slot is in the store: concurrent creates of one id
        // journal at most one SlotCreated.
        let _claim = self.store.claim_slot(id).ok_or(EngineError::AlreadyExists(id))?;
        if self.store.contains_slot(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let ledger = SlotLedger::new(capacity);
        let event = Event::SlotCreated { id, service_id, span, ledger };
        self.commit(&event).await?;
        let state = SlotState::new(id, service_id, span, ledger);
        let info = state.info(self.now_ms());
        self.store.insert_slot(state);
        self.notify.send(&event);
        Ok(info)
    }

    /// Admin capacity edit. Lowering below `booked` is allowed and leaves the
    /// slot overbooked; nobody is cancelled.
    pub async fn set_capacity(&self, id: Ulid, new_total: u32) -> Result<SlotInfo, EngineError> {
        validate_capacity(new_total)?;
        let _gate = self.commit_gate.read().await;
        let slot = self.slot_handle(&id)?;
        let mut guard = self.live(&slot, id).await?;

        let mut next = guard.ledger;
        ledger::set_ceiling(&mut next, new_total)?;
        if next == guard.ledger {
            return Ok(guard.info(self.now_ms()));
        }

        let event = Event::SlotCapacityChanged { id, ledger: next };
        self.persist_and_apply(&mut guard, &event).await?;

        if next.is_overbooked() {
            warn!(
                slot_id = %id,
                total = next.total,
                booked = next.booked,
                "capacity reduced below booked count; slot is overbooked"
            );
            metrics::counter!(crate::observability::OVERBOOKED_SLOTS_TOTAL).increment(1);
        }
        Ok(guard.info(self.now_ms()))
    }

    /// Remove a slot. Refused while any non-terminal booking references it.
    pub async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let slot = self.slot_handle(&id)?;
        let mut guard = self.live(&slot, id).await?;
        if !guard.outstanding.is_empty() {
            return Err(EngineError::HasOutstandingBookings(id));
        }

        let event = Event::SlotDeleted { id };
        self.commit(&event).await?;
        guard.deleted = true;
        self.store.remove_slot(&guard);
        self.notify.send(&event);
        info!(slot_id = %id, "slot deleted");
        Ok(())
    }
}

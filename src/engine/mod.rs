mod adjust;
mod bookings;
mod error;
mod journal;
mod ledger;
mod lifecycle;
mod locks;
mod package;
mod queries;
mod slots;
mod store;

pub use bookings::NewBooking;
pub use error::EngineError;
pub use journal::{Journal, MemoryJournal, WalJournal};
pub use lifecycle::{plan, CapacityEffect, CompletionPolicy, PackageEffect, TransitionPlan};
pub use store::SlotState;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;

use store::{SharedSlotState, Store};

/// One tenant's capacity engine.
///
/// Every mutation follows the same shape: take the guards it needs in
/// booking → slot → usage order, validate on copies, append one event to the
/// journal, then apply that event and notify subscribers. A failed append
/// leaves memory untouched.
pub struct Engine {
    pub(super) store: Store,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    pub(super) config: EngineConfig,
    /// Mutations hold this shared; compaction takes it exclusively so the
    /// snapshot and the log cannot diverge.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Open the tenant WAL at `wal_path`, replay it and start the writer task.
    pub fn open(
        wal_path: &Path,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> std::io::Result<Self> {
        let (journal, events) = WalJournal::open(wal_path)?;
        Ok(Self::from_events(
            Arc::new(journal),
            Arc::new(SystemClock),
            notify,
            config,
            &events,
        ))
    }

    /// Engine over an injected journal and clock, starting empty.
    pub fn with_journal(
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> Self {
        Self::from_events(journal, clock, notify, config, &[])
    }

    /// Rebuild state from already-journaled events.
    pub fn from_events(
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
        events: &[Event],
    ) -> Self {
        let store = Store::new();
        for event in events {
            store.replay_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                events = events.len(),
                slots = store.slot_count(),
                "replayed journal"
            );
        }
        Self {
            store,
            journal,
            clock,
            notify,
            config,
            commit_gate: RwLock::new(()),
        }
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append one event durably. Callers apply it only after this returns Ok.
    pub(super) async fn commit(&self, event: &Event) -> Result<(), EngineError> {
        self.journal
            .append(event)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal + apply a slot-scoped event under the caller's write guard.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.commit(event).await?;
        slot.apply(event);
        self.notify.send(event);
        Ok(())
    }

    pub(super) fn slot_handle(&self, id: &Ulid) -> Result<SharedSlotState, EngineError> {
        self.store.get_slot(id).ok_or(EngineError::NotFound(*id))
    }

    /// Write-lock a slot, failing if it was deleted while we waited.
    pub(super) async fn live(
        &self,
        slot: &SharedSlotState,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SlotState>, EngineError> {
        let guard = slot.clone().write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    /// Rewrite the journal as the minimal event list recreating current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let now = self.now_ms();
        let mut events = Vec::new();

        for usage in self.store.usage_handles() {
            let usage = usage.lock().await;
            events.push(Event::UsageCreated {
                key: usage.key,
                counters: usage.counters,
            });
        }

        let mut booking_ids = Vec::new();
        for slot in self.store.slot_handles() {
            let slot = slot.read().await;
            events.push(Event::SlotCreated {
                id: slot.id,
                service_id: slot.service_id,
                span: slot.span,
                ledger: slot.ledger,
            });
            // Expired locks are dead weight; the sweeper would drop them anyway.
            for lock in slot.active_locks(now) {
                events.push(Event::LockAcquired { lock: lock.clone() });
            }
            booking_ids.extend(slot.bookings.iter().map(|b| (*b, slot.ledger)));
        }

        for (id, ledger) in booking_ids {
            let Some(booking) = self.store.get_booking(&id) else { continue };
            let booking = booking.lock().await.clone();
            events.push(Event::BookingCreated {
                booking,
                ledger,
                usage: None,
                released_lock: None,
            });
        }

        let count = events.len();
        self.journal
            .compact(events)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "compacted journal");
        Ok(())
    }
}

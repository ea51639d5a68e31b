use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::adjust::{self, PackageRef, TransitionInput};
use super::lifecycle::CapacityEffect;
use super::store::apply_to_booking;
use super::{Engine, EngineError};

/// Booking creation request.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub visitor_count: u32,
    /// `Pending` or `Confirmed`.
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Draw from this subscription's package for the slot's service.
    pub subscription_id: Option<Ulid>,
    /// The checkout session's own hold, consumed by this booking.
    pub lock_id: Option<Ulid>,
}

impl NewBooking {
    pub fn confirmed(id: Ulid, slot_id: Ulid, visitor_count: u32) -> Self {
        Self {
            id,
            slot_id,
            visitor_count,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            subscription_id: None,
            lock_id: None,
        }
    }
}

fn rejection_reason(e: &EngineError) -> Option<&'static str> {
    match e {
        EngineError::InsufficientCapacity { .. } => Some("insufficient_capacity"),
        EngineError::SlotFull { .. } => Some("held"),
        _ => None,
    }
}

fn record_rejection(e: &EngineError) {
    if let Some(reason) = rejection_reason(e) {
        metrics::counter!(crate::observability::CAPACITY_REJECTIONS_TOTAL, "reason" => reason)
            .increment(1);
    }
}

impl Engine {
    /// Create a booking. Capacity is re-validated here against the ledger and
    /// every other session's active hold; the caller's own lock is excluded
    /// from that count and released in the same commit.
    pub async fn create_booking(&self, req: NewBooking) -> Result<Booking, EngineError> {
        if req.visitor_count == 0 {
            return Err(EngineError::InvalidArgument("visitor_count must be positive"));
        }
        if req.visitor_count > MAX_VISITOR_COUNT {
            return Err(EngineError::LimitExceeded("visitor_count too large"));
        }

        let _gate = self.commit_gate.read().await;
        // Same-id creations may target different slots, so the slot guard
        // alone does not serialize them.
        let _claim = self
            .store
            .claim_booking(req.id)
            .ok_or(EngineError::AlreadyExists(req.id))?;
        if self.store.contains_booking(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let slot = self.slot_handle(&req.slot_id)?;
        let mut guard = self.live(&slot, req.slot_id).await?;

        let key = req.subscription_id.map(|subscription_id| UsageKey {
            subscription_id,
            service_id: guard.service_id,
        });
        let usage = match key {
            Some(key) => Some(
                self.store
                    .get_usage(&key)
                    .ok_or(EngineError::NotFound(key.subscription_id))?,
            ),
            None => None,
        };
        let mut usage_guard = match &usage {
            Some(u) => Some(u.lock().await),
            None => None,
        };

        let now = self.now_ms();
        let own_lock = req
            .lock_id
            .and_then(|id| guard.lock(id))
            .map(|l| l.id);
        let input = TransitionInput {
            booking_id: req.id,
            slot_id: req.slot_id,
            from: None,
            to: req.status,
            visitor_count: req.visitor_count,
            ledger: guard.ledger,
            held_by_others: guard.held_excluding(now, own_lock),
            package: match (key, usage_guard.as_deref()) {
                (Some(key), Some(u)) => Some(PackageRef {
                    key,
                    counters: u.counters,
                    covered: 0,
                }),
                _ => None,
            },
        };
        let adj = adjust::apply_transition(input, self.config.completion_policy).inspect_err(record_rejection)?;

        let booking = Booking {
            id: req.id,
            slot_id: req.slot_id,
            service_id: guard.service_id,
            visitor_count: req.visitor_count,
            status: req.status,
            payment_status: req.payment_status,
            subscription_id: req.subscription_id,
            package_covered: adj.package_covered,
            version: 1,
            created_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
            ledger: adj.ledger,
            usage: adj.usage,
            released_lock: own_lock,
        };
        self.commit(&event).await?;

        guard.apply(&event);
        if let (Some(u), Some(counters)) = (usage_guard.as_deref_mut(), adj.usage) {
            u.counters = counters;
        }
        if let Some(lock_id) = own_lock {
            self.store.unmap_lock(&lock_id);
        }
        self.store.insert_booking(booking.clone());
        drop(usage_guard);
        drop(guard);
        self.notify.send(&event);

        info!(
            booking_id = %booking.id,
            slot_id = %booking.slot_id,
            status = %booking.status,
            visitors = booking.visitor_count,
            package_covered = booking.package_covered,
            "booking created"
        );
        Ok(booking)
    }

    /// Move a booking to `to`, applying the capacity and package effects the
    /// lifecycle table prescribes. Same-state requests succeed without a write.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        to: BookingStatus,
        expected_version: Option<u64>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let handle = self.store.get_booking(&id).ok_or(EngineError::NotFound(id))?;
        let mut booking = handle.lock().await;
        check_version(&booking, expected_version)?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition { from: booking.status, to });
        }

        let slot = self.slot_handle(&booking.slot_id)?;
        let mut guard = self.live(&slot, booking.slot_id).await?;

        let key = booking.subscription_id.map(|subscription_id| UsageKey {
            subscription_id,
            service_id: booking.service_id,
        });
        let usage = key.and_then(|k| self.store.get_usage(&k));
        let mut usage_guard = match &usage {
            Some(u) => Some(u.lock().await),
            None => None,
        };

        let input = TransitionInput {
            booking_id: id,
            slot_id: booking.slot_id,
            from: Some(booking.status),
            to,
            visitor_count: booking.visitor_count,
            ledger: guard.ledger,
            held_by_others: guard.held(self.now_ms()),
            package: match (key, usage_guard.as_deref()) {
                (Some(key), Some(u)) => Some(PackageRef {
                    key,
                    counters: u.counters,
                    covered: booking.package_covered,
                }),
                _ => None,
            },
        };
        let adj = adjust::apply_transition(input, self.config.completion_policy).inspect_err(record_rejection)?;
        if adj.noop {
            return Ok(booking.clone());
        }

        let from = booking.status;
        let event = Event::BookingTransitioned {
            id,
            slot_id: booking.slot_id,
            from,
            to,
            version: booking.version + 1,
            ledger: adj.ledger,
            usage: adj.usage,
        };
        self.commit(&event).await?;

        guard.apply(&event);
        apply_to_booking(&mut booking, &event);
        if let (Some(u), Some(counters)) = (usage_guard.as_deref_mut(), adj.usage) {
            u.counters = counters;
        }
        let result = booking.clone();
        drop(usage_guard);
        drop(guard);
        drop(booking);
        self.notify.send(&event);

        metrics::counter!(
            crate::observability::BOOKING_TRANSITIONS_TOTAL,
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        match adj.capacity {
            CapacityEffect::Credit => {
                info!(booking_id = %id, %from, %to, units = result.visitor_count, "capacity returned");
            }
            CapacityEffect::Debit => {
                info!(booking_id = %id, %from, %to, units = result.visitor_count, "capacity taken");
            }
            CapacityEffect::None => {}
        }
        Ok(result)
    }

    /// Record a payment state change. Has no capacity effect and is allowed
    /// in any booking state, so refunds can follow a cancellation.
    pub async fn set_payment_status(
        &self,
        id: Ulid,
        payment_status: PaymentStatus,
        expected_version: Option<u64>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let handle = self.store.get_booking(&id).ok_or(EngineError::NotFound(id))?;
        let mut booking = handle.lock().await;
        check_version(&booking, expected_version)?;
        if booking.payment_status == payment_status {
            return Ok(booking.clone());
        }

        let event = Event::PaymentStatusChanged {
            id,
            slot_id: booking.slot_id,
            payment_status,
            version: booking.version + 1,
        };
        self.commit(&event).await?;
        apply_to_booking(&mut booking, &event);
        let result = booking.clone();
        drop(booking);
        self.notify.send(&event);
        Ok(result)
    }

    /// Open a package quota for (subscription, service).
    pub async fn create_package_usage(
        &self,
        subscription_id: Ulid,
        service_id: Ulid,
        quantity: u32,
    ) -> Result<PackageUsage, EngineError> {
        if quantity > MAX_PACKAGE_QUANTITY {
            return Err(EngineError::LimitExceeded("package quantity too large"));
        }
        let key = UsageKey { subscription_id, service_id };

        let _gate = self.commit_gate.read().await;
        let _claim = self
            .store
            .claim_usage(key)
            .ok_or(EngineError::AlreadyExists(subscription_id))?;
        if self.store.contains_usage(&key) {
            return Err(EngineError::AlreadyExists(subscription_id));
        }
        let usage = PackageUsage {
            key,
            counters: UsageCounters::new(quantity),
        };
        let event = Event::UsageCreated {
            key,
            counters: usage.counters,
        };
        self.commit(&event).await?;
        self.store.insert_usage(usage.clone());
        self.notify.send(&event);
        Ok(usage)
    }
}

fn check_version(booking: &Booking, expected: Option<u64>) -> Result<(), EngineError> {
    match expected {
        Some(expected) if expected != booking.version => Err(EngineError::VersionConflict {
            id: booking.id,
            expected,
            actual: booking.version,
        }),
        _ => Ok(()),
    }
}

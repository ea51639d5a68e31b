//! Capacity Adjustment Engine.
//!
//! The only caller of [`ledger::debit`]/[`ledger::credit`]. Works on copies of
//! the slot ledger and usage counters: either every step succeeds and the
//! caller gets the new values to journal and write back, or it returns an
//! error and nothing changed.

use ulid::Ulid;

use crate::model::{BookingStatus, SlotLedger, UsageCounters, UsageKey};

use super::lifecycle::{self, CapacityEffect, CompletionPolicy, PackageEffect};
use super::{ledger, package, EngineError};

/// Package quota touched by a transition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackageRef {
    pub key: UsageKey,
    pub counters: UsageCounters,
    /// Units the booking already drew from the package (restore path).
    pub covered: u32,
}

/// Inputs shared by creation and status changes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransitionInput {
    pub booking_id: Ulid,
    pub slot_id: Ulid,
    pub from: Option<BookingStatus>,
    pub to: BookingStatus,
    pub visitor_count: u32,
    pub ledger: SlotLedger,
    /// Units held by active locks other than the caller's own.
    pub held_by_others: u32,
    pub package: Option<PackageRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Adjustment {
    pub ledger: SlotLedger,
    pub usage: Option<UsageCounters>,
    pub package_covered: u32,
    pub capacity: CapacityEffect,
    pub noop: bool,
}

pub(crate) fn apply_transition(
    input: TransitionInput,
    policy: CompletionPolicy,
) -> Result<Adjustment, EngineError> {
    let plan = lifecycle::plan(input.from, input.to, policy)?;
    let mut ledger = input.ledger;
    let mut usage = input.package.map(|p| p.counters);
    let mut package_covered = input.package.map_or(0, |p| p.covered);

    if plan.noop {
        return Ok(Adjustment {
            ledger,
            usage: None,
            package_covered,
            capacity: CapacityEffect::None,
            noop: true,
        });
    }

    match plan.capacity {
        CapacityEffect::Debit => {
            ledger::debit(&mut ledger, input.slot_id, input.visitor_count)?;
            // Ledger already counts this booking; holds are checked on top.
            let before = input.ledger;
            ledger::check_hold_room(&before, input.slot_id, input.held_by_others, input.visitor_count)?;
        }
        CapacityEffect::Credit => ledger::credit(&mut ledger, input.visitor_count),
        CapacityEffect::None => {}
    }

    if let (Some(pkg), Some(counters)) = (input.package, usage.as_mut()) {
        match plan.package {
            PackageEffect::Consume => {
                package_covered = package::consume(counters, input.visitor_count);
            }
            PackageEffect::Restore => {
                package::restore(counters, &pkg.key, pkg.covered);
            }
            PackageEffect::None => {}
        }
    }

    // Only report usage rows that actually changed.
    let usage = match plan.package {
        PackageEffect::None => None,
        _ => usage,
    };

    debug_assert!(package_covered <= input.visitor_count);
    tracing::trace!(
        booking_id = %input.booking_id,
        from = ?input.from,
        to = %input.to,
        capacity = ?plan.capacity,
        "transition planned"
    );

    Ok(Adjustment {
        ledger,
        usage,
        package_covered,
        capacity: plan.capacity,
        noop: false,
    })
}

//! Booking Lifecycle State Machine.
//!
//! `plan` is the single source of truth for which status changes are legal
//! and which ledger effects each one triggers. Nothing else decides.

use serde::{Deserialize, Serialize};

use crate::model::BookingStatus;

use super::EngineError;

/// What a `completed` booking does to slot capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Served capacity stays consumed and is never resold.
    #[default]
    Retain,
    /// Completion credits capacity back, like `no_show`.
    Restore,
}

impl std::str::FromStr for CompletionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(CompletionPolicy::Retain),
            "restore" => Ok(CompletionPolicy::Restore),
            other => Err(format!("unknown completion policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityEffect {
    None,
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageEffect {
    None,
    Consume,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub capacity: CapacityEffect,
    pub package: PackageEffect,
    /// Same-state no-op: nothing is written.
    pub noop: bool,
}

impl TransitionPlan {
    const fn effect(capacity: CapacityEffect, package: PackageEffect) -> Self {
        Self { capacity, package, noop: false }
    }

    const NOOP: Self = Self {
        capacity: CapacityEffect::None,
        package: PackageEffect::None,
        noop: true,
    };
}

/// Decide the ledger effects of moving from `from` (None = creation) to `to`.
pub fn plan(
    from: Option<BookingStatus>,
    to: BookingStatus,
    policy: CompletionPolicy,
) -> Result<TransitionPlan, EngineError> {
    use BookingStatus::*;
    use CapacityEffect as C;
    use PackageEffect as P;

    let Some(from) = from else {
        // Creation consumes the package once, whatever the initial status.
        return match to {
            Pending => Ok(TransitionPlan::effect(C::None, P::Consume)),
            Confirmed => Ok(TransitionPlan::effect(C::Debit, P::Consume)),
            other => Err(EngineError::InvalidTransition { from: Pending, to: other }),
        };
    };

    if from.is_terminal() {
        return Err(EngineError::InvalidTransition { from, to });
    }
    if from == to {
        return Ok(TransitionPlan::NOOP);
    }

    let plan = match (from, to) {
        (Pending, Confirmed) => TransitionPlan::effect(C::Debit, P::None),
        (Pending, Cancelled) => TransitionPlan::effect(C::None, P::Restore),
        (Confirmed, CheckedIn) => TransitionPlan::effect(C::None, P::None),
        (Confirmed | CheckedIn, Cancelled) => TransitionPlan::effect(C::Credit, P::Restore),
        (Confirmed | CheckedIn, NoShow) => TransitionPlan::effect(C::Credit, P::None),
        (Confirmed | CheckedIn, Completed) => match policy {
            CompletionPolicy::Retain => TransitionPlan::effect(C::None, P::None),
            CompletionPolicy::Restore => TransitionPlan::effect(C::Credit, P::None),
        },
        _ => return Err(EngineError::InvalidTransition { from, to }),
    };
    Ok(plan)
}

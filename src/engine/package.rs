//! Package Usage Ledger: per (subscription, service) quota arithmetic.

use tracing::warn;

use crate::model::{UsageCounters, UsageKey};

/// Draw up to `units` from the quota. Returns how many were covered; the
/// caller bills the rest.
pub(crate) fn consume(counters: &mut UsageCounters, units: u32) -> u32 {
    let consumed = units.min(counters.remaining);
    counters.remaining -= consumed;
    counters.used += consumed;
    consumed
}

/// Give back `units` previously consumed. Clamps at `used`.
pub(crate) fn restore(counters: &mut UsageCounters, key: &UsageKey, units: u32) -> u32 {
    let restored = units.min(counters.used);
    if restored < units {
        warn!(
            subscription_id = %key.subscription_id,
            service_id = %key.service_id,
            requested = units,
            used = counters.used,
            "package restore exceeds recorded usage; clamping"
        );
    }
    counters.used -= restored;
    counters.remaining += restored;
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn key() -> UsageKey {
        UsageKey {
            subscription_id: Ulid::new(),
            service_id: Ulid::new(),
        }
    }

    #[test]
    fn consume_clamps_to_remaining() {
        let mut c = UsageCounters::new(3);
        let consumed = consume(&mut c, 5);
        assert_eq!(consumed, 3);
        assert_eq!(c.remaining, 0);
        assert_eq!(c.used, 3);
        assert!(c.is_balanced());
    }

    #[test]
    fn consume_on_empty_quota_covers_nothing() {
        let mut c = UsageCounters::new(0);
        assert_eq!(consume(&mut c, 2), 0);
        assert_eq!(c, UsageCounters::new(0));
    }

    #[test]
    fn restore_reverses_consume() {
        let mut c = UsageCounters::new(4);
        let consumed = consume(&mut c, 2);
        restore(&mut c, &key(), consumed);
        assert_eq!(c, UsageCounters::new(4));
    }

    #[test]
    fn restore_more_than_used_clamps() {
        let mut c = UsageCounters::new(4);
        consume(&mut c, 1);
        let restored = restore(&mut c, &key(), 3);
        assert_eq!(restored, 1);
        assert_eq!(c.remaining, 4);
        assert_eq!(c.used, 0);
        assert!(c.is_balanced());
    }
}

//! Hard limits guarding a tenant engine against unbounded input.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SLOTS_PER_TENANT: usize = 1_000_000;
pub const MAX_LOCKS_PER_SLOT: usize = 10_000;
pub const MAX_SLOT_CAPACITY: u32 = 1_000_000;
pub const MAX_VISITOR_COUNT: u32 = 10_000;
pub const MAX_PACKAGE_QUANTITY: u32 = 1_000_000;
pub const MAX_SESSION_ID_LEN: usize = 256;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One slot never spans more than a week.
pub const MAX_SLOT_DURATION_MS: Ms = 7 * 24 * 3_600_000;
/// Rows accepted by one multi-row INSERT.
pub const MAX_BATCH_SIZE: usize = 1_000;

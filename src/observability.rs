use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tally_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tally_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tally_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tally_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tally_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "tally_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tally_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tally_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservation locks granted.
pub const LOCKS_ACQUIRED_TOTAL: &str = "tally_locks_acquired_total";

/// Counter: lock requests refused because the slot was full.
pub const LOCKS_REJECTED_TOTAL: &str = "tally_locks_rejected_total";

/// Counter: expired locks removed by the sweeper.
pub const LOCKS_SWEPT_TOTAL: &str = "tally_locks_swept_total";

/// Counter: committed booking status changes. Labels: from, to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "tally_booking_transitions_total";

/// Counter: bookings refused for lack of capacity. Labels: reason.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "tally_capacity_rejections_total";

/// Counter: capacity edits that left a slot overbooked.
pub const OVERBOOKED_SLOTS_TOTAL: &str = "tally_overbooked_slots_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSlots { .. } => "insert_slots",
        Command::UpdateSlotCapacity { .. } => "update_slot_capacity",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::InsertLock { .. } => "insert_lock",
        Command::ExtendLock { .. } => "extend_lock",
        Command::DeleteLock { .. } => "delete_lock",
        Command::InsertPackageUsage { .. } => "insert_package_usage",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::UpdatePaymentStatus { .. } => "update_payment_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectLocks { .. } => "select_locks",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPackageUsage { .. } => "select_package_usage",
    }
}

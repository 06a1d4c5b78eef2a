use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

/// Counter: bookings refused by the write-time availability guard.
pub const BOOKING_CONFLICTS_TOTAL: &str = "roombook_booking_conflicts_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom(_) => "insert_room",
        Command::InsertImage { .. } => "insert_image",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertHostReservation { .. } => "insert_host_reservation",
        Command::UpdateRoom { .. } => "update_room",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::UpdateHostReservation { .. } => "update_host_reservation",
        Command::DeleteRoom { .. } => "delete_room",
        Command::DeleteImage { .. } => "delete_image",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::DeleteHostReservation { .. } => "delete_host_reservation",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRooms(_) => "select_rooms",
        Command::SelectReservations(_) => "select_reservations",
        Command::SelectHostReservations(_) => "select_host_reservations",
    }
}

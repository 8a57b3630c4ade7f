use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotgate_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotgate_query_duration_seconds";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "slotgate_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotgate_connections_total";

/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotgate_connections_rejected_total";

/// Gauge: accounts with a loaded engine.
pub const ACCOUNTS_ACTIVE: &str = "slotgate_accounts_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotgate_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotgate_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (initial status, `conflict` or `rejected`).
pub const BOOKINGS_TOTAL: &str = "slotgate_bookings_total";

/// Counter: applied appointment transitions. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "slotgate_transitions_total";

/// Counter: submitted chat drafts. Labels: status.
pub const MESSAGES_TOTAL: &str = "slotgate_messages_total";

/// Counter: outbound notice deliveries. Labels: kind, status.
pub const OUTBOUND_TOTAL: &str = "slotgate_outbound_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertAccount { .. } => "upsert_account",
        Command::SelectAccount => "select_account",
        Command::ImportSchedule { .. } => "import_schedule",
        Command::SelectSchedule => "select_schedule",
        Command::InsertBlackouts { .. } => "insert_blackouts",
        Command::DeleteBlackout { .. } => "delete_blackout",
        Command::SelectBlackouts => "select_blackouts",
        Command::UpsertService { .. } => "upsert_service",
        Command::SelectServices => "select_services",
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::TransitionAppointment { .. } => "transition_appointment",
        Command::SelectPolicy => "select_policy",
        Command::UpdatePolicy { .. } => "update_policy",
        Command::InsertMessage { .. } => "insert_message",
        Command::SelectMessages { .. } => "select_messages",
        Command::TransitionMessage { .. } => "transition_message",
    }
}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "agenndo_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "agenndo_query_duration_seconds";

/// Counter: booking admissions. Labels: outcome (`admitted` or the refusal kind).
pub const ADMISSIONS_TOTAL: &str = "agenndo_admissions_total";

/// Histogram: time spent acquiring the candidate books during admission.
pub const ADMISSION_LOCK_WAIT_SECONDS: &str = "agenndo_admission_lock_wait_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "agenndo_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "agenndo_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "agenndo_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agenndo_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agenndo_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agenndo_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
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
        Command::InsertBusiness { .. } => "insert_business",
        Command::UpdateBusiness { .. } => "update_business",
        Command::InsertService { .. } => "insert_service",
        Command::UpdateService { .. } => "update_service",
        Command::InsertCollaborator { .. } => "insert_collaborator",
        Command::UpdateCollaborator { .. } => "update_collaborator",
        Command::InsertEligibility { .. } => "insert_eligibility",
        Command::DeleteEligibility { .. } => "delete_eligibility",
        Command::InsertWeeklySchedule { .. } => "insert_weekly_schedule",
        Command::DeleteWeeklySchedule { .. } => "delete_weekly_schedule",
        Command::InsertOverride { .. } => "insert_override",
        Command::DeleteOverride { .. } => "delete_override",
        Command::InsertClient { .. } => "insert_client",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectEligibleCollaborators { .. } => "select_eligible_collaborators",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectClient { .. } => "select_client",
        Command::SelectBusiness { .. } => "select_business",
        Command::SelectServices { .. } => "select_services",
    }
}

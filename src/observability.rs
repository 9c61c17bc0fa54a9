use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "caja_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "caja_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "caja_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "caja_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "caja_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "caja_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "caja_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "caja_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "caja_wal_compactions_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: weeks closed across all rondas.
pub const WEEKS_CLOSED_TOTAL: &str = "caja_weeks_closed_total";

/// Counter: rondas that reached their last week.
pub const RONDAS_FINISHED_TOTAL: &str = "caja_rondas_finished_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSocio(_) => "insert_socio",
        Command::InsertRonda { .. } => "insert_ronda",
        Command::AssignParticipants { .. } => "assign_participants",
        Command::Reorder { .. } => "reorder",
        Command::SetResponsable { .. } => "set_responsable",
        Command::InsertAporte { .. } => "insert_aporte",
        Command::InsertAhorro { .. } => "insert_ahorro",
        Command::Deposit { .. } => "deposit",
        Command::Withdraw { .. } => "withdraw",
        Command::InsertPrestamo { .. } => "insert_prestamo",
        Command::SettlePrestamo { .. } => "settle_prestamo",
        Command::CancelPrestamo { .. } => "cancel_prestamo",
        Command::CerrarSemana { .. } => "cerrar_semana",
        Command::SelectSocios { .. } => "select_socios",
        Command::SelectRondas { .. } => "select_rondas",
        Command::SelectNextCodigo => "select_next_codigo",
        Command::SelectParticipantes { .. } => "select_participantes",
        Command::SelectTurno { .. } => "select_turno",
        Command::SelectSemana { .. } => "select_semana",
        Command::SelectSemanas { .. } => "select_semanas",
        Command::SelectResultados { .. } => "select_resultados",
        Command::SelectResumen { .. } => "select_resumen",
        Command::SelectAhorros { .. } => "select_ahorros",
        Command::SelectSaldo { .. } => "select_saldo",
        Command::SelectPrestamos { .. } => "select_prestamos",
    }
}

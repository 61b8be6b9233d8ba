use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Matching runs ───────────────────────────────────────────────

/// Counter: matching runs. Labels: status (`ok` or `error`).
pub const MATCH_RUNS_TOTAL: &str = "allotment_match_runs_total";

/// Histogram: load, match and write-back of one period, in seconds.
pub const MATCH_DURATION_SECONDS: &str = "allotment_match_duration_seconds";

/// Histogram: convergence passes per run.
pub const MATCH_PASSES: &str = "allotment_match_passes";

/// Counter: bookings accepted by occasions, evictions included.
pub const MATCH_ACCEPTANCES_TOTAL: &str = "allotment_match_acceptances_total";

/// Counter: holders displaced by a stronger booking.
pub const MATCH_EVICTIONS_TOTAL: &str = "allotment_match_evictions_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL flush + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "allotment_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "allotment_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

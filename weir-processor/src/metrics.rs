//! Prometheus metrics for one processor instance. The metric names are a
//! contract with the surrounding pipeline's dashboards.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use weir_core::{Error, Result};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Gauge and counter handles. Collectors also register on the process-wide
/// registry for text exposition; a second processor instance keeps working
/// through its own handles even though only the first one's collectors win
/// the registration.
pub struct Metrics {
    pub reservoir_size: IntGauge,
    pub window_count: IntGauge,
    pub trace_buffer_size: IntGauge,
    pub trace_buffer_span_count: IntGauge,
    pub trace_buffer_root_traces: IntGauge,
    pub checkpoint_age_seconds: IntGauge,
    pub db_size_bytes: IntGauge,
    pub sampled_spans_total: IntCounter,
    pub lru_evictions_total: IntCounter,
    pub db_compactions_total: IntCounter,
    pub checkpoint_errors_total: IntCounter,
}

fn gauge(name: &str, help: &str) -> Result<IntGauge> {
    let g = IntGauge::new(name, help).map_err(|e| Error::config(format!("metric {name}: {e}")))?;
    REGISTRY.register(Box::new(g.clone())).ok();
    Ok(g)
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::new(name, help).map_err(|e| Error::config(format!("metric {name}: {e}")))?;
    REGISTRY.register(Box::new(c.clone())).ok();
    Ok(c)
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reservoir_size: gauge("reservoir_size", "Current reservoir occupancy")?,
            window_count: gauge("window_count", "Spans seen in the current window")?,
            trace_buffer_size: gauge("trace_buffer_size", "Traces held in the trace buffer")?,
            trace_buffer_span_count: gauge(
                "trace_buffer_span_count",
                "Total spans across buffered traces",
            )?,
            trace_buffer_root_traces: gauge(
                "trace_buffer_root_traces",
                "Buffered traces whose root span has arrived",
            )?,
            checkpoint_age_seconds: gauge(
                "checkpoint_age_seconds",
                "Seconds since the last successful checkpoint",
            )?,
            db_size_bytes: gauge("db_size_bytes", "Checkpoint store footprint in bytes")?,
            sampled_spans_total: counter(
                "sampled_spans_total",
                "Spans that entered the reservoir",
            )?,
            lru_evictions_total: counter(
                "lru_evictions_total",
                "Whole traces evicted from the trace buffer under pressure",
            )?,
            db_compactions_total: counter(
                "db_compactions_total",
                "Successful checkpoint store compactions",
            )?,
            checkpoint_errors_total: counter(
                "checkpoint_errors_total",
                "Failed checkpoint store writes",
            )?,
        })
    }
}

/// Encode the process-wide registry in Prometheus text format, for whatever
/// HTTP surface the host pipeline exposes.
pub fn dump_prometheus() -> String {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}

#![forbid(unsafe_code)]

//! Shared helpers for the weir integration suite: span builders and
//! downstream doubles.

use std::sync::Arc;

use parking_lot::Mutex;

use weir_core::{Error, Result, SpanId, SpanRecord, SpanWithContext, TraceId};
use weir_processor::DownstreamConsumer;

/// Build a span with deterministic ids. `trace` and `span` seed the id
/// bytes; `parent` of zero marks a root span.
pub fn make_span(trace: u64, span: u64, parent: u64) -> SpanWithContext {
    let mut trace_bytes = [0u8; 16];
    trace_bytes[8..].copy_from_slice(&trace.to_be_bytes());
    SpanWithContext {
        span: SpanRecord {
            trace_id: TraceId(trace_bytes),
            span_id: SpanId(span.to_be_bytes()),
            parent_span_id: SpanId(parent.to_be_bytes()),
            name: format!("op-{span}"),
            start_time_unix_nanos: span * 1_000,
            end_time_unix_nanos: span * 1_000 + 500,
        },
        resource: Some(weir_core::ResourceInfo {
            service_name: Some("weir-tests".to_string()),
        }),
        scope: Some(weir_core::ScopeInfo {
            name: "weir-integration".to_string(),
        }),
    }
}

/// A batch of distinct single-span traces.
pub fn distinct_spans(count: u64) -> Vec<SpanWithContext> {
    (1..=count).map(|i| make_span(i, i, 0)).collect()
}

/// Downstream that always fails, for drain-error behavior.
#[derive(Debug, Default)]
pub struct FailingConsumer {
    pub attempts: Mutex<usize>,
}

impl DownstreamConsumer for FailingConsumer {
    fn consume(&self, _spans: Vec<SpanWithContext>) -> Result<()> {
        *self.attempts.lock() += 1;
        Err(Error::downstream("exporter unavailable"))
    }
}

/// Install a test-visible tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("info")
        .try_init();
}

/// Convenience alias used across the suite.
pub type SharedConsumer = Arc<weir_processor::CollectingConsumer>;

pub fn collecting_consumer() -> SharedConsumer {
    Arc::new(weir_processor::CollectingConsumer::new())
}

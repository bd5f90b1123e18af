//! Minimal wiring demo: feed synthetic traces through a short-windowed
//! processor and print the drained samples plus the metrics dump.
//!
//! Run with: cargo run -p weir-processor --example pipeline

use std::{sync::Arc, time::Duration};

use weir_core::{SpanBuilder, SpanId, TraceId, WeirConfig};
use weir_processor::{dump_prometheus, LoggingConsumer, SamplingProcessor};

fn span(trace: u64, span_id: u64, parent: u64) -> weir_core::SpanWithContext {
    let mut trace_bytes = [0u8; 16];
    trace_bytes[8..].copy_from_slice(&trace.to_be_bytes());
    SpanBuilder::new(TraceId(trace_bytes), SpanId(span_id.to_be_bytes()))
        .parent(SpanId(parent.to_be_bytes()))
        .name(format!("operation-{span_id}"))
        .times(span_id * 1_000, span_id * 1_000 + 750)
        .service_name("demo-service")
        .scope_name("weir.demo")
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = WeirConfig {
        size_k: 32,
        window_duration: Duration::from_secs(2),
        trace_buffer_timeout: Duration::from_millis(300),
        ..WeirConfig::default()
    };
    let processor = SamplingProcessor::new(config, Arc::new(LoggingConsumer))?;
    Arc::clone(&processor).start().await?;

    // Two hundred traces of three spans each, trickled in.
    for trace in 1..=200u64 {
        let root = trace * 10;
        processor.consume_traces(vec![
            span(trace, root, 0),
            span(trace, root + 1, root),
            span(trace, root + 2, root),
        ]);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Let the harvester release the tail and the window roll over once.
    tokio::time::sleep(Duration::from_secs(3)).await;
    processor.consume_traces(vec![span(9999, 99990, 0)]);

    println!("{}", dump_prometheus());
    processor.shutdown().await;
    Ok(())
}

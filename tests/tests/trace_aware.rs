// Trace-aware mode: whole-trace atomicity through buffer, harvest, and
// drain, plus LRU pressure behavior.

use std::{collections::HashMap, sync::Arc, time::Duration};

use weir_core::{TraceId, WeirConfig};
use weir_integration_tests::{collecting_consumer, init_tracing, make_span};
use weir_processor::SamplingProcessor;

fn trace_config(timeout: Duration, max_traces: usize) -> WeirConfig {
    WeirConfig {
        size_k: 100,
        trace_aware: true,
        trace_buffer_timeout: timeout,
        trace_buffer_max_size: max_traces,
        window_duration: Duration::from_secs(3600),
        ..WeirConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_traces_reach_the_reservoir_whole() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(
        trace_config(Duration::from_millis(50), 100_000),
        downstream.clone(),
    )
    .unwrap();

    // 3 traces x 4 spans, interleaved arrival.
    for span in 1..=4u64 {
        for trace in 1..=3u64 {
            processor.consume_traces(vec![make_span(trace, trace * 100 + span, 0)]);
        }
    }
    assert_eq!(processor.trace_buffer().unwrap().size(), 3);
    assert_eq!(processor.trace_buffer().unwrap().span_count(), 12);
    assert_eq!(processor.reservoir_size(), 0);

    // Quiesce past the inactivity timeout, then force a harvest.
    tokio::time::sleep(Duration::from_millis(200)).await;
    processor.harvest_now();
    assert_eq!(processor.reservoir_size(), 12);
    assert_eq!(processor.trace_buffer().unwrap().size(), 0);

    processor.force_rollover();
    let drained = downstream.spans();
    assert_eq!(drained.len(), 12);

    // Every trace arrives complete: all four spans or none.
    let mut by_trace: HashMap<TraceId, usize> = HashMap::new();
    for span in &drained {
        *by_trace.entry(span.span.trace_id).or_default() += 1;
    }
    assert_eq!(by_trace.len(), 3);
    assert!(by_trace.values().all(|&n| n == 4));
}

#[tokio::test]
async fn incomplete_traces_never_drain() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(
        trace_config(Duration::from_secs(10), 100_000),
        downstream.clone(),
    )
    .unwrap();

    processor.consume_traces(vec![make_span(1, 1, 0), make_span(1, 2, 1)]);
    processor.harvest_now(); // nothing has timed out
    processor.force_rollover();
    assert_eq!(downstream.span_count(), 0);
    assert_eq!(processor.trace_buffer().unwrap().span_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn lru_pressure_evicts_oldest_whole_and_refresh_protects() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(
        trace_config(Duration::from_millis(200), 5),
        downstream.clone(),
    )
    .unwrap();

    // T1..T7 in order; capacity 5 pushes out T1 and T2.
    for trace in 1..=7u64 {
        processor.consume_traces(vec![make_span(trace, trace, 0)]);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(processor.metrics().lru_evictions_total.get(), 2);
    assert_eq!(processor.trace_buffer().unwrap().size(), 5);

    // Touching T3 refreshes it; the next eviction victim is T4.
    processor.consume_traces(vec![make_span(3, 33, 3)]);
    processor.consume_traces(vec![make_span(8, 8, 0)]);
    assert_eq!(processor.metrics().lru_evictions_total.get(), 3);

    tokio::time::sleep(Duration::from_millis(250)).await;
    processor.harvest_now();
    processor.force_rollover();

    let survivors: HashMap<TraceId, usize> =
        downstream.spans().iter().fold(HashMap::new(), |mut acc, s| {
            *acc.entry(s.span.trace_id).or_default() += 1;
            acc
        });
    let expect_trace = |t: u64| {
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&t.to_be_bytes());
        TraceId(bytes)
    };
    assert_eq!(survivors.len(), 5);
    assert_eq!(survivors.get(&expect_trace(3)), Some(&2), "refreshed trace keeps both spans");
    for gone in [1u64, 2, 4] {
        assert!(!survivors.contains_key(&expect_trace(gone)), "trace {gone} should be evicted");
    }
    for kept in [5u64, 6, 7, 8] {
        assert_eq!(survivors.get(&expect_trace(kept)), Some(&1));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn background_harvester_releases_traces() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(
        trace_config(Duration::from_millis(500), 100_000),
        downstream.clone(),
    )
    .unwrap();
    Arc::clone(&processor).start().await.unwrap();

    processor.consume_traces(vec![make_span(1, 1, 0), make_span(1, 2, 1)]);
    // Harvester period is max(timeout/10, 1s); give it one full period.
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(processor.reservoir_size(), 2);
    assert_eq!(processor.trace_buffer().unwrap().size(), 0);

    processor.shutdown().await;
}

// End-to-end sampling behavior of the processor facade in direct
// (trace-aware-off) mode: fill, overflow, rollover, and drain failure.

use std::{sync::Arc, time::Duration};

use weir_core::WeirConfig;
use weir_integration_tests::{collecting_consumer, distinct_spans, init_tracing, FailingConsumer};
use weir_processor::SamplingProcessor;

fn direct_config(k: usize) -> WeirConfig {
    WeirConfig {
        size_k: k,
        trace_aware: false,
        window_duration: Duration::from_secs(3600),
        ..WeirConfig::default()
    }
}

#[tokio::test]
async fn fill_under_capacity_keeps_every_span() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(direct_config(100), downstream.clone()).unwrap();

    let inputs = distinct_spans(50);
    processor.consume_traces(inputs.clone());
    assert_eq!(processor.reservoir_size(), 50);

    processor.force_rollover();
    let drained = downstream.spans();
    assert_eq!(drained.len(), 50);
    // Exactly the fed spans, no more, no less.
    let mut fed: Vec<_> = inputs.iter().map(|s| s.fingerprint()).collect();
    let mut got: Vec<_> = drained.iter().map(|s| s.fingerprint()).collect();
    fed.sort_unstable();
    got.sort_unstable();
    assert_eq!(fed, got);
}

#[tokio::test]
async fn overflow_holds_at_capacity() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(direct_config(10), downstream).unwrap();

    for batch in distinct_spans(1000).chunks(50) {
        processor.consume_traces(batch.to_vec());
        assert!(processor.reservoir_size() <= 10);
    }
    assert_eq!(processor.reservoir_size(), 10);
    assert_eq!(processor.window().seen, 1000);

    let sampled = processor.metrics().sampled_spans_total.get();
    assert!(
        (10..=1000).contains(&sampled),
        "sampled {sampled} replacements"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn window_rollover_drains_downstream() {
    init_tracing();
    let config = WeirConfig {
        size_k: 20,
        trace_aware: false,
        window_duration: Duration::from_millis(100),
        ..WeirConfig::default()
    };
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream.clone()).unwrap();

    processor.consume_traces(distinct_spans(100));
    let first_window = processor.window().id;

    tokio::time::sleep(Duration::from_millis(150)).await;
    processor.consume_traces(vec![weir_integration_tests::make_span(5000, 5000, 0)]);

    assert_eq!(processor.window().id, first_window + 1);
    assert!(downstream.batch_count() >= 1);
    for batch in downstream.batches() {
        assert!(batch.len() <= 20, "drain of {} spans exceeds K", batch.len());
    }
    // The late span belongs to the new window.
    assert_eq!(processor.window().seen, 1);
    assert_eq!(processor.reservoir_size(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_ingestion_keeps_counters_exact() {
    init_tracing();
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(direct_config(100), downstream).unwrap();

    let mut workers = Vec::new();
    for worker in 0..8u64 {
        let processor = Arc::clone(&processor);
        workers.push(tokio::spawn(async move {
            for chunk in 0..10u64 {
                let base = worker * 5_000 + chunk * 500;
                let batch: Vec<_> = (1..=500u64)
                    .map(|i| weir_integration_tests::make_span(base + i, base + i, 0))
                    .collect();
                processor.consume_traces(batch);
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(processor.window().seen, 40_000);
    assert_eq!(processor.reservoir_size(), 100);
}

#[tokio::test]
async fn drain_failure_sheds_the_batch_and_keeps_going() {
    init_tracing();
    let downstream = Arc::new(FailingConsumer::default());
    let downstream_clone: Arc<FailingConsumer> = Arc::clone(&downstream);
    let processor = SamplingProcessor::new(direct_config(10), downstream_clone).unwrap();

    processor.consume_traces(distinct_spans(5));
    processor.force_rollover();
    assert_eq!(*downstream.attempts.lock(), 1);
    assert_eq!(processor.reservoir_size(), 0, "failed batch is dropped");

    // The next window keeps sampling as if nothing happened.
    processor.consume_traces(distinct_spans(3));
    assert_eq!(processor.reservoir_size(), 3);
}

// Checkpoint durability: restart recovery, crash recovery, and expiry.

use std::{collections::HashSet, sync::Arc, time::Duration};

use weir_core::WeirConfig;
use weir_integration_tests::{collecting_consumer, distinct_spans, init_tracing};
use weir_processor::SamplingProcessor;

fn checkpoint_config(dir: &tempfile::TempDir, k: usize) -> WeirConfig {
    WeirConfig {
        size_k: k,
        trace_aware: false,
        window_duration: Duration::from_secs(3600),
        checkpoint_path: Some(dir.path().join("weir.redb")),
        checkpoint_interval: Duration::from_millis(100),
        ..WeirConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_resumes_window_and_reservoir() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = checkpoint_config(&dir, 50);

    let before: (u64, HashSet<u64>, u64) = {
        let downstream = collecting_consumer();
        let processor = SamplingProcessor::new(config.clone(), downstream).unwrap();
        Arc::clone(&processor).start().await.unwrap();
        processor.consume_traces(distinct_spans(500));
        // Let at least one ticker checkpoint land before shutting down.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let window = processor.window();
        let contents = processor.reservoir_fingerprints().into_iter().collect();
        processor.shutdown().await;
        (window.id, contents, window.seen)
    };

    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream).unwrap();
    Arc::clone(&processor).start().await.unwrap();

    let window = processor.window();
    assert_eq!(window.id, before.0, "window id survives the restart");
    assert!(window.seen >= 500);
    assert_eq!(processor.reservoir_size(), 50);
    let restored: HashSet<u64> = processor.reservoir_fingerprints().into_iter().collect();
    assert_eq!(restored, before.1, "reservoir contents survive as a set");
    assert_eq!(before.2, window.seen);

    processor.shutdown().await;
}

#[tokio::test]
async fn crash_without_orderly_shutdown_still_recovers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = checkpoint_config(&dir, 20);

    {
        // Never started: no background tasks, no final checkpoint; only the
        // explicit tick below lands in the store.
        let downstream = collecting_consumer();
        let processor = SamplingProcessor::new(config.clone(), downstream).unwrap();
        processor.consume_traces(distinct_spans(100));
        processor.consume_traces(distinct_spans(30));
        processor.checkpoint_now().unwrap();
        // More arrivals after the last checkpoint are lost with the crash.
        processor.consume_traces(vec![weir_integration_tests::make_span(999, 999, 0)]);
    }

    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream).unwrap();
    Arc::clone(&processor).start().await.unwrap();
    assert_eq!(processor.window().id, 1);
    assert_eq!(processor.reservoir_size(), 20);
    // Seen-count resumes from the checkpointed 130, not the post-crash 131.
    assert_eq!(processor.window().seen, 130);
}

#[tokio::test]
async fn expired_checkpoint_starts_fresh() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = checkpoint_config(&dir, 20);
    config.window_duration = Duration::from_secs(1);

    {
        let downstream = collecting_consumer();
        let processor = SamplingProcessor::new(config.clone(), downstream).unwrap();
        // Advance to window 3 so a stale resume would be visible.
        processor.force_rollover();
        processor.force_rollover();
        processor.consume_traces(distinct_spans(10));
        processor.checkpoint_now().unwrap();
    }

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream).unwrap();
    Arc::clone(&processor).start().await.unwrap();
    assert_eq!(processor.window().id, 1, "expired window is not adopted");
    assert_eq!(processor.reservoir_size(), 0);
    assert_eq!(processor.window().seen, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn compaction_cron_fires_and_counts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = checkpoint_config(&dir, 20);
    config.checkpoint_interval = Duration::from_secs(30);
    config.db_compaction_schedule_cron = Some("* * * * * *".to_string()); // every second
    config.db_compaction_target_size = 0;

    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream).unwrap();
    Arc::clone(&processor).start().await.unwrap();
    processor.consume_traces(distinct_spans(50));
    processor.checkpoint_now().unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(
        processor.metrics().db_compactions_total.get() >= 1,
        "cron-scheduled compaction never ran"
    );
    assert!(processor.metrics().db_size_bytes.get() > 0);

    processor.shutdown().await;
}

#[tokio::test]
async fn checkpointing_disabled_without_path() {
    init_tracing();
    let config = WeirConfig {
        trace_aware: false,
        checkpoint_path: None,
        ..WeirConfig::default()
    };
    let downstream = collecting_consumer();
    let processor = SamplingProcessor::new(config, downstream).unwrap();
    assert!(processor.checkpoint_now().is_err());
    Arc::clone(&processor).start().await.unwrap();
    processor.shutdown().await;
}

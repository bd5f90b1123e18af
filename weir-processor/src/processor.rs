//! The sampling processor facade: accepts span batches, routes them through
//! the trace buffer or straight into the reservoir, drives the background
//! loops, and proxies drained samples downstream.
//!
//! Runtime errors are absorbed: the sampler's job is to shed load, and
//! surfacing errors upstream would defeat that purpose. Only
//! misconfiguration propagates, from construction and `start`.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime},
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use weir_checkpoint::{CheckpointManager, CheckpointStore, RedbStore};
use weir_core::{Error, Result, SpanWithContext, WeirConfig};
use weir_sampler::{Reservoir, TraceBuffer, WindowClock, WindowSnapshot};

use crate::{downstream::DownstreamConsumer, metrics::Metrics};

/// Lifecycle of one processor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    New,
    Loading,
    Running,
    Draining,
    Closed,
}

/// Trace-aware reservoir sampling stage.
pub struct SamplingProcessor {
    config: WeirConfig,
    clock: Arc<WindowClock>,
    reservoir: Arc<Reservoir>,
    trace_buffer: Option<Arc<TraceBuffer>>,
    checkpoint: Option<Arc<CheckpointManager>>,
    metrics: Arc<Metrics>,
    state: Mutex<ProcessorState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SamplingProcessor {
    /// Build a processor over the configured checkpoint path (a redb file).
    /// Fails only on misconfiguration; an unopenable store merely disables
    /// checkpointing for the run.
    pub fn new(config: WeirConfig, downstream: Arc<dyn DownstreamConsumer>) -> Result<Arc<Self>> {
        Self::build(config, downstream, None)
    }

    /// Build a processor over a caller-supplied store, ignoring
    /// `checkpoint_path`.
    pub fn with_store(
        config: WeirConfig,
        downstream: Arc<dyn DownstreamConsumer>,
        store: Box<dyn CheckpointStore>,
    ) -> Result<Arc<Self>> {
        Self::build(config, downstream, Some(store))
    }

    fn build(
        config: WeirConfig,
        downstream: Arc<dyn DownstreamConsumer>,
        store_override: Option<Box<dyn CheckpointStore>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new()?);
        let clock = Arc::new(WindowClock::new(config.window_duration));
        let reservoir = Arc::new(Reservoir::new(config.size_k, Arc::clone(&clock)));

        // Drain-on-rollover runs synchronously while the window transition is
        // held, so the whole sample is charged to the closed window.
        {
            let reservoir = Arc::clone(&reservoir);
            let downstream = Arc::clone(&downstream);
            let metrics = Arc::clone(&metrics);
            clock.on_rollover(move |closed| {
                debug!(window = closed.id, seen = closed.seen, "window rolled over");
                if let Err(e) = reservoir.drain_into(|spans| downstream.consume(spans)) {
                    error!(window = closed.id, "downstream emission failed, sample lost: {e}");
                }
                metrics.reservoir_size.set(0);
                metrics.window_count.set(0);
            });
        }

        let trace_buffer = config.trace_aware.then(|| {
            Arc::new(TraceBuffer::new(
                config.trace_buffer_max_size,
                config.trace_buffer_timeout,
            ))
        });

        let checkpoint = match store_override {
            Some(store) => Some(Arc::new(CheckpointManager::new(store))),
            None => match &config.checkpoint_path {
                Some(path) => match RedbStore::open(path) {
                    Ok(store) => Some(Arc::new(CheckpointManager::new(Box::new(store)))),
                    Err(e) => {
                        error!("checkpoint store unavailable, checkpointing disabled: {e}");
                        None
                    }
                },
                None => None,
            },
        };

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            clock,
            reservoir,
            trace_buffer,
            checkpoint,
            metrics,
            state: Mutex::new(ProcessorState::New),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Restore any usable checkpoint and spawn the background loops. Takes a
    /// clone of the handle; the caller keeps its own for ingestion.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ProcessorState::New {
                return Err(Error::config("processor already started"));
            }
            *state = ProcessorState::Loading;
        }

        if let Some(manager) = &self.checkpoint {
            match manager.restore(SystemTime::now()) {
                Ok(Some(restored)) => {
                    let window = restored.window;
                    let count = restored.spans.len();
                    self.clock
                        .force_state(window.id, window.start, window.end, window.seen);
                    self.reservoir.restore(restored.spans);
                    info!(window = window.id, spans = count, "resumed from checkpoint");
                }
                Ok(None) => info!("no usable checkpoint, starting with a fresh window"),
                Err(e) => warn!("checkpoint restore failed, starting fresh: {e}"),
            }
            self.sync_checkpoint_metrics(manager);
        }
        self.update_sampler_gauges();

        {
            let mut tasks = self.tasks.lock();
            if self.trace_buffer.is_some() {
                tasks.push(tokio::spawn(
                    Arc::clone(&self).harvest_loop(self.shutdown_tx.subscribe()),
                ));
            }
            if self.checkpoint.is_some() {
                tasks.push(tokio::spawn(
                    Arc::clone(&self).checkpoint_loop(self.shutdown_tx.subscribe()),
                ));
                if let Some(expr) = &self.config.db_compaction_schedule_cron {
                    // Validated at construction; re-parsed here to own it.
                    if let Ok(schedule) = cron::Schedule::from_str(expr) {
                        tasks.push(tokio::spawn(
                            Arc::clone(&self)
                                .compaction_loop(schedule, self.shutdown_tx.subscribe()),
                        ));
                    }
                }
            }
        }

        *self.state.lock() = ProcessorState::Running;
        info!(
            trace_aware = self.config.trace_aware,
            k = self.config.size_k,
            "sampling processor running"
        );
        Ok(())
    }

    /// Ingest one batch. Never blocks on or reports downstream trouble; a
    /// sampler applies no backpressure. Spans with empty trace or span ids
    /// are dropped silently.
    pub fn consume_traces(&self, batch: Vec<SpanWithContext>) {
        self.clock.check_rollover();
        for span in batch {
            if span.span.trace_id.is_empty() || span.span.span_id.is_empty() {
                continue;
            }
            match &self.trace_buffer {
                Some(buffer) => {
                    let outcome = buffer.add(span);
                    if outcome.evicted > 0 {
                        self.metrics.lru_evictions_total.inc_by(outcome.evicted);
                    }
                }
                None => {
                    if self.reservoir.add(span) {
                        self.metrics.sampled_spans_total.inc();
                    }
                }
            }
        }
        self.update_sampler_gauges();
    }

    /// Release completed traces into the reservoir immediately, without
    /// waiting for the harvester's next tick.
    pub fn harvest_now(&self) {
        self.clock.check_rollover();
        let Some(buffer) = &self.trace_buffer else {
            return;
        };
        let completed = buffer.harvest_completed();
        if !completed.is_empty() {
            debug!(traces = completed.len(), "releasing completed traces");
        }
        for trace in completed {
            for span in trace.spans {
                if self.reservoir.add(span) {
                    self.metrics.sampled_spans_total.inc();
                }
            }
        }
        self.update_sampler_gauges();
    }

    /// Write a checkpoint immediately. Errors if checkpointing is disabled.
    pub fn checkpoint_now(&self) -> Result<()> {
        let manager = self
            .checkpoint
            .as_ref()
            .ok_or_else(|| Error::config("checkpointing is disabled"))?;
        let (window, spans) = self.consistent_snapshot();
        let result = manager.checkpoint(&window, &spans);
        self.sync_checkpoint_metrics(manager);
        result
    }

    /// Close the current window now, draining its sample downstream.
    pub fn force_rollover(&self) {
        self.clock.force_rollover();
        self.update_sampler_gauges();
    }

    /// Stop the background loops, write a final checkpoint, and flush the
    /// store. Bounded: every loop observes the signal within one period.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ProcessorState::Draining | ProcessorState::Closed => return,
                _ => *state = ProcessorState::Draining,
            }
        }
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(manager) = &self.checkpoint {
            let (window, spans) = self.consistent_snapshot();
            if let Err(e) = manager.checkpoint(&window, &spans) {
                error!("final checkpoint failed: {e}");
            }
            if let Err(e) = manager.flush() {
                error!("checkpoint store flush failed: {e}");
            }
            self.sync_checkpoint_metrics(manager);
        }

        *self.state.lock() = ProcessorState::Closed;
        info!("sampling processor closed");
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock()
    }

    pub fn window(&self) -> WindowSnapshot {
        self.clock.current()
    }

    pub fn reservoir_size(&self) -> usize {
        self.reservoir.size()
    }

    /// Fingerprints currently held, for restart-identity checks.
    pub fn reservoir_fingerprints(&self) -> Vec<u64> {
        self.reservoir.insertion_order()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &WeirConfig {
        &self.config
    }

    pub fn trace_buffer(&self) -> Option<&TraceBuffer> {
        self.trace_buffer.as_deref()
    }

    async fn harvest_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = std::cmp::max(
            self.config.trace_buffer_timeout / 10,
            Duration::from_secs(1),
        );
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.harvest_now(),
            }
        }
    }

    async fn checkpoint_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.checkpoint_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.checkpoint_tick(),
            }
        }
    }

    async fn compaction_loop(
        self: Arc<Self>,
        schedule: cron::Schedule,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                info!("compaction schedule has no further occurrences");
                return;
            };
            let wait = (next - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(wait) => self.compact_tick(),
            }
        }
    }

    fn checkpoint_tick(&self) {
        let Some(manager) = &self.checkpoint else {
            return;
        };
        let (window, spans) = self.consistent_snapshot();
        if let Err(e) = manager.checkpoint(&window, &spans) {
            error!("checkpoint tick failed: {e}");
        }
        self.sync_checkpoint_metrics(manager);
    }

    fn compact_tick(&self) {
        let Some(manager) = &self.checkpoint else {
            return;
        };
        match manager.compact_if_needed(self.config.db_compaction_target_size) {
            Ok(true) => {
                self.metrics.db_compactions_total.inc();
                info!("checkpoint store compacted");
            }
            Ok(false) => {}
            Err(e) => error!("checkpoint store compaction failed: {e}"),
        }
        if let Ok(size) = manager.store_size() {
            self.metrics.db_size_bytes.set(size as i64);
        }
    }

    /// Window identity and reservoir contents observed under the same window.
    /// Both reads are cheap; retry covers the rare rollover between them.
    fn consistent_snapshot(&self) -> (WindowSnapshot, HashMap<u64, SpanWithContext>) {
        loop {
            let before = self.clock.current();
            let spans = self.reservoir.snapshot();
            let after = self.clock.current();
            if before.id == after.id {
                return (after, spans);
            }
        }
    }

    fn update_sampler_gauges(&self) {
        self.metrics.reservoir_size.set(self.reservoir.size() as i64);
        self.metrics
            .window_count
            .set(self.clock.current().seen as i64);
        if let Some(buffer) = &self.trace_buffer {
            self.metrics.trace_buffer_size.set(buffer.size() as i64);
            self.metrics
                .trace_buffer_span_count
                .set(buffer.span_count() as i64);
            self.metrics
                .trace_buffer_root_traces
                .set(buffer.root_trace_count() as i64);
        }
    }

    fn sync_checkpoint_metrics(&self, manager: &CheckpointManager) {
        if let Some(age) = manager.checkpoint_age() {
            self.metrics.checkpoint_age_seconds.set(age.as_secs() as i64);
        }
        if let Ok(size) = manager.store_size() {
            self.metrics.db_size_bytes.set(size as i64);
        }
        let errors = manager.error_count();
        let reported = self.metrics.checkpoint_errors_total.get();
        if errors > reported {
            self.metrics.checkpoint_errors_total.inc_by(errors - reported);
        }
    }
}

impl std::fmt::Debug for SamplingProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingProcessor")
            .field("state", &self.state())
            .field("window", &self.clock.current().id)
            .field("reservoir_size", &self.reservoir.size())
            .finish()
    }
}

//! Checkpoint manager: periodically persists the window identity, counters,
//! and reservoir contents; restores them on startup; runs store compaction.
//!
//! A tick writes the state record first, so a crash mid-tick leaves a
//! partial-but-valid checkpoint: the recorded seen-count keeps Algorithm R's
//! probability math correct even when fewer spans than counted were
//! persisted. Runtime errors are absorbed (logged and counted); corrupt
//! state never blocks ingestion.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime},
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use weir_core::{Result, SpanWithContext};
use weir_sampler::WindowSnapshot;

use crate::{
    codec,
    store::{
        span_key, span_prefix, state_key, window_id_from_state_key, CheckpointStore,
        CURRENT_WINDOW_KEY, STATE_PREFIX,
    },
};

/// Spans per store transaction, bounding per-transaction memory.
const SPAN_BATCH_SIZE: usize = 100;

/// What a successful restore hands back to the processor.
pub struct RestoredState {
    pub window: WindowSnapshot,
    pub spans: HashMap<u64, SpanWithContext>,
}

/// Serializes reservoir state into a [`CheckpointStore`] and back.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    // One tick at a time; snapshots are taken by the caller beforehand, so
    // this is never held while a sampler lock is.
    io_lock: Mutex<()>,
    last_success: Mutex<Option<Instant>>,
    errors: AtomicU64,
    compactions: AtomicU64,
}

impl CheckpointManager {
    pub fn new(store: Box<dyn CheckpointStore>) -> Self {
        Self {
            store,
            io_lock: Mutex::new(()),
            last_success: Mutex::new(None),
            errors: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
        }
    }

    /// Persist one consistent snapshot of the window and reservoir.
    ///
    /// Span batches that fail are logged and counted but do not abort the
    /// tick; the state record is the validity criterion. Returns an error
    /// only when that record (or the window pointer) cannot be written.
    pub fn checkpoint(
        &self,
        window: &WindowSnapshot,
        spans: &HashMap<u64, SpanWithContext>,
    ) -> Result<()> {
        let _io = self.io_lock.lock();

        let state = codec::encode_state(
            window.id,
            codec::unix_secs(window.start),
            codec::unix_secs(window.end),
            window.seen,
        );
        if let Err(e) = self.store.put(&state_key(window.id), &state) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        // Rewrite this window's span records from scratch; replaced-out
        // spans must not resurface on restore.
        if let Err(e) = self.store.delete_prefix(&span_prefix(window.id)) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            error!(window = window.id, "failed to clear stale span records: {e}");
        }
        let entries: Vec<(Vec<u8>, Vec<u8>)> = spans
            .iter()
            .map(|(fp, span)| (span_key(window.id, *fp), codec::encode_span(span)))
            .collect();
        let mut failed_batches = 0u64;
        for chunk in entries.chunks(SPAN_BATCH_SIZE) {
            if let Err(e) = self.store.put_batch(chunk) {
                failed_batches += 1;
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(window = window.id, "span batch write failed: {e}");
            }
        }

        if let Err(e) = self
            .store
            .put(CURRENT_WINDOW_KEY, window.id.to_string().as_bytes())
        {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        self.gc_stale_windows(window.id);
        *self.last_success.lock() = Some(Instant::now());
        debug!(
            window = window.id,
            spans = spans.len(),
            failed_batches,
            "checkpoint written"
        );
        Ok(())
    }

    /// Load the latest checkpoint if it names a still-valid window.
    ///
    /// Returns `Ok(None)` for a fresh store, a missing or unparseable state
    /// record, or an expired window. Corrupt span records are skipped
    /// per-record; if more spans load than the recorded seen-count, the
    /// count is raised to match.
    pub fn restore(&self, now: SystemTime) -> Result<Option<RestoredState>> {
        let pointer = match self.store.get(CURRENT_WINDOW_KEY)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let window_id: u64 = match std::str::from_utf8(&pointer)
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(id) => id,
            None => {
                warn!("unparseable current-window pointer, starting fresh");
                return Ok(None);
            }
        };

        let state = match self.store.get(&state_key(window_id))? {
            Some(raw) => raw,
            None => {
                warn!(window = window_id, "window pointer without state record");
                return Ok(None);
            }
        };
        let (id, start_unix, end_unix, mut seen) = match codec::decode_state(&state) {
            Ok(state) => state,
            Err(e) => {
                warn!(window = window_id, "corrupt state record: {e}");
                return Ok(None);
            }
        };
        let start = codec::from_unix_secs(start_unix);
        let end = codec::from_unix_secs(end_unix);
        if now >= end {
            debug!(window = id, "checkpointed window already expired");
            return Ok(None);
        }

        let mut spans = HashMap::new();
        for (key, value) in self.store.scan_prefix(&span_prefix(id))? {
            match codec::decode_span(&value) {
                Ok(span) => {
                    spans.insert(span.fingerprint(), span);
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        "skipping corrupt span record: {e}"
                    );
                }
            }
        }
        // A past writer may have persisted more spans than it recorded.
        if (spans.len() as u64) > seen {
            seen = spans.len() as u64;
        }

        Ok(Some(RestoredState {
            window: WindowSnapshot {
                id,
                start,
                end,
                seen,
            },
            spans,
        }))
    }

    /// Run store compaction unless the footprint is under `target_size`
    /// (zero means no size guard). Returns whether compaction ran.
    pub fn compact_if_needed(&self, target_size: u64) -> Result<bool> {
        if target_size > 0 {
            let size = self.store.size_on_disk()?;
            if size < target_size {
                debug!(size, target_size, "store below compaction target, skipping");
                return Ok(false);
            }
        }
        let _io = self.io_lock.lock();
        self.store.compact()?;
        self.compactions.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Drop state and span records of windows older than `current`. Restore
    /// only ever reads the pointer's window, so this is safe.
    fn gc_stale_windows(&self, current: u64) {
        let stale = match self.store.scan_prefix(STATE_PREFIX) {
            Ok(records) => records,
            Err(e) => {
                warn!("state scan for gc failed: {e}");
                return;
            }
        };
        for (key, _) in stale {
            let Some(id) = window_id_from_state_key(&key) else {
                continue;
            };
            if id >= current {
                continue;
            }
            if let Err(e) = self.store.delete(&key) {
                warn!(window = id, "failed to gc state record: {e}");
            }
            if let Err(e) = self.store.delete_prefix(&span_prefix(id)) {
                warn!(window = id, "failed to gc span records: {e}");
            }
        }
    }

    /// Time since the last successful checkpoint.
    pub fn checkpoint_age(&self) -> Option<std::time::Duration> {
        self.last_success.lock().map(|t| t.elapsed())
    }

    /// Store footprint for the size gauge.
    pub fn store_size(&self) -> Result<u64> {
        self.store.size_on_disk()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn compaction_count(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Final flush before the store is dropped on shutdown.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("errors", &self.error_count())
            .field("compactions", &self.compaction_count())
            .finish()
    }
}

//! Uniform reservoir over the current window's span stream, classical
//! Algorithm R.
//!
//! Contents are keyed by span fingerprint; a parallel insertion-order vector
//! gives each element the stable positional index the replacement step needs.
//! Both update together under one writer lock. The PRNG has its own mutex so
//! sampling decisions never block on storage work and vice versa.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, Rng, SeedableRng};

use weir_core::{Result, SpanWithContext};

use crate::window::WindowClock;

#[derive(Default)]
struct ReservoirInner {
    spans: HashMap<u64, SpanWithContext>,
    order: Vec<u64>,
}

impl ReservoirInner {
    fn clear(&mut self) {
        self.spans.clear();
        self.order.clear();
    }
}

/// At most K spans sampled uniformly from the current window.
pub struct Reservoir {
    capacity: usize,
    clock: Arc<WindowClock>,
    inner: RwLock<ReservoirInner>,
    rng: Mutex<StdRng>,
}

impl Reservoir {
    pub fn new(capacity: usize, clock: Arc<WindowClock>) -> Self {
        Self::with_rng(capacity, clock, StdRng::from_entropy())
    }

    /// Deterministic variant for statistical tests.
    pub fn with_rng(capacity: usize, clock: Arc<WindowClock>, rng: StdRng) -> Self {
        Self {
            capacity,
            clock,
            inner: RwLock::new(ReservoirInner::default()),
            rng: Mutex::new(rng),
        }
    }

    /// Sample one span into the current window's reservoir. Returns whether
    /// the span entered the reservoir (appended or replaced an element).
    ///
    /// The arrival index comes from the clock's atomic counter before any
    /// lock is taken, so this never waits on a rollover in progress.
    pub fn add(&self, span: SpanWithContext) -> bool {
        let n = self.clock.increment_seen();
        let fp = span.fingerprint();

        if (n as usize) <= self.capacity {
            let mut inner = self.inner.write();
            // Identical fingerprint: last writer wins, position unchanged.
            if inner.spans.insert(fp, span).is_none() {
                inner.order.push(fp);
            }
            return true;
        }

        let j = {
            let mut rng = self.rng.lock();
            rng.gen_range(0..n)
        };
        if (j as usize) >= self.capacity {
            return false;
        }

        let mut inner = self.inner.write();
        if inner.spans.contains_key(&fp) {
            inner.spans.insert(fp, span);
            return true;
        }
        // Duplicate arrivals can leave the reservoir short of K even with
        // n > K; grow instead of replacing a slot that does not exist.
        if (j as usize) >= inner.order.len() {
            inner.spans.insert(fp, span);
            inner.order.push(fp);
            return true;
        }
        let victim = inner.order[j as usize];
        inner.spans.remove(&victim);
        inner.order[j as usize] = fp;
        inner.spans.insert(fp, span);
        true
    }

    /// Remove all contents in insertion order and hand them to `emit`. The
    /// reservoir is empty afterwards even when emission fails; the spans of a
    /// failed batch are lost, which is acceptable for a load-shedding stage.
    pub fn drain_into(&self, emit: impl FnOnce(Vec<SpanWithContext>) -> Result<()>) -> Result<()> {
        let spans = self.drain();
        if spans.is_empty() {
            return Ok(());
        }
        emit(spans)
    }

    /// Remove and return all contents in insertion order.
    pub fn drain(&self) -> Vec<SpanWithContext> {
        let mut inner = self.inner.write();
        let mut out = Vec::with_capacity(inner.order.len());
        let order = std::mem::take(&mut inner.order);
        for fp in order {
            if let Some(span) = inner.spans.remove(&fp) {
                out.push(span);
            }
        }
        inner.clear();
        out
    }

    /// Shallow copy of the contents, keyed by fingerprint, for checkpointing.
    pub fn snapshot(&self) -> HashMap<u64, SpanWithContext> {
        self.inner.read().spans.clone()
    }

    /// Replace contents from a snapshot. Insertion order is rebuilt in scan
    /// order; Algorithm R only needs set membership and size from here on,
    /// so the original positional provenance is not required.
    pub fn restore(&self, spans: HashMap<u64, SpanWithContext>) {
        let mut inner = self.inner.write();
        inner.order = spans.keys().copied().collect();
        inner.spans = spans;
    }

    /// Empty the reservoir without emitting.
    pub fn reset(&self) {
        self.inner.write().clear();
    }

    pub fn size(&self) -> usize {
        self.inner.read().spans.len()
    }

    /// Fingerprints by positional index. The vector mirrors the content set.
    pub fn insertion_order(&self) -> Vec<u64> {
        self.inner.read().order.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

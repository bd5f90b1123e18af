//! Trace-completion buffer.
//!
//! Groups incoming spans by trace id so that each trace reaches the
//! reservoir as a single unit: all of its spans or none. A trace counts as
//! complete once no new span has joined it for the configured timeout. Under
//! capacity pressure the least-recently-touched trace is evicted whole; a
//! partial trace is worse than no trace, because downstream stitching reads
//! missing spans as anomalies.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::Mutex;

use weir_core::{SpanId, SpanWithContext, TraceId};

struct TraceEntry {
    spans: HashMap<SpanId, SpanWithContext>,
    last_updated: Instant,
    root_seen: bool,
}

/// One completed trace released from the buffer.
pub struct CompletedTrace {
    pub trace_id: TraceId,
    pub spans: Vec<SpanWithContext>,
}

/// Outcome of one [`TraceBuffer::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// False when the span carried an empty trace or span id.
    pub accepted: bool,
    /// Number of traces evicted whole to make room (0 or 1).
    pub evicted: u64,
}

struct BufferInner {
    traces: LruCache<TraceId, TraceEntry>,
    span_total: usize,
    root_traces: usize,
    evictions: u64,
}

/// Spans grouped by trace, LRU-bounded, released on inactivity.
pub struct TraceBuffer {
    inner: Mutex<BufferInner>,
    timeout: Duration,
}

impl TraceBuffer {
    /// `max_traces` counts distinct traces, not spans. Validated positive by
    /// configuration; a zero is clamped to one rather than panicking.
    pub fn new(max_traces: usize, timeout: Duration) -> Self {
        let cap = NonZeroUsize::new(max_traces).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(BufferInner {
                traces: LruCache::new(cap),
                span_total: 0,
                root_traces: 0,
                evictions: 0,
            }),
            timeout,
        }
    }

    /// Associate a span with its trace, refreshing the trace's recency and
    /// inactivity clock. Spans with empty ids are rejected silently.
    pub fn add(&self, span: SpanWithContext) -> AddOutcome {
        if span.span.trace_id.is_empty() || span.span.span_id.is_empty() {
            return AddOutcome {
                accepted: false,
                evicted: 0,
            };
        }

        let trace_id = span.span.trace_id;
        let span_id = span.span.span_id;
        let is_root = span.span.is_root();
        let now = Instant::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.traces.get_mut(&trace_id) {
            // get_mut also refreshes the LRU position.
            if entry.spans.insert(span_id, span).is_none() {
                inner.span_total += 1;
            }
            if is_root && !entry.root_seen {
                entry.root_seen = true;
                inner.root_traces += 1;
            }
            entry.last_updated = now;
            return AddOutcome {
                accepted: true,
                evicted: 0,
            };
        }

        let mut spans = HashMap::with_capacity(4);
        spans.insert(span_id, span);
        let entry = TraceEntry {
            spans,
            last_updated: now,
            root_seen: is_root,
        };
        let mut evicted_traces = 0;
        if let Some((victim_id, victim)) = inner.traces.push(trace_id, entry) {
            // push returns the displaced LRU entry once the cache is full.
            debug_assert_ne!(victim_id, trace_id);
            inner.span_total -= victim.spans.len();
            if victim.root_seen {
                inner.root_traces -= 1;
            }
            inner.evictions += 1;
            evicted_traces = 1;
            tracing::debug!(trace_id = %victim_id, spans = victim.spans.len(), "evicted trace under pressure");
        }
        inner.span_total += 1;
        if is_root {
            inner.root_traces += 1;
        }
        AddOutcome {
            accepted: true,
            evicted: evicted_traces,
        }
    }

    /// Remove and return every trace whose inactivity has reached the
    /// timeout. Recency is not touched while scanning.
    pub fn harvest_completed(&self) -> Vec<CompletedTrace> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<TraceId> = inner
            .traces
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_updated) >= self.timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut completed = Vec::with_capacity(expired.len());
        for trace_id in expired {
            if let Some(entry) = inner.traces.pop(&trace_id) {
                inner.span_total -= entry.spans.len();
                if entry.root_seen {
                    inner.root_traces -= 1;
                }
                completed.push(CompletedTrace {
                    trace_id,
                    spans: entry.spans.into_values().collect(),
                });
            }
        }
        completed
    }

    /// Number of traces currently held.
    pub fn size(&self) -> usize {
        self.inner.lock().traces.len()
    }

    /// Total spans across all held traces.
    pub fn span_count(&self) -> usize {
        self.inner.lock().span_total
    }

    /// Held traces whose root span has arrived. Root arrival does not declare
    /// completion by itself; children may still arrive.
    pub fn root_trace_count(&self) -> usize {
        self.inner.lock().root_traces
    }

    /// Whole-trace evictions since construction.
    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }
}

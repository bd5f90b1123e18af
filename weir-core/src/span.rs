//! Span data model for the sampling stage.
//!
//! The core treats span payloads as opaque: only the identifiers, the parent
//! link, and the resource/scope context needed to reconstruct a span on
//! output are interpreted. Everything is cloned on ingress so the stage owns
//! its copy and the upstream is free to reuse buffers.

use std::fmt;

/// 16-byte trace identifier shared by every span of a distributed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// An all-zero trace id marks an invalid span; such spans are rejected.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 8-byte span identifier, unique within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The span fields the stage carries through sampling and checkpointing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// All-zero when the span is a trace root.
    pub parent_span_id: SpanId,
    pub name: String,
    pub start_time_unix_nanos: u64,
    pub end_time_unix_nanos: u64,
}

impl SpanRecord {
    /// A root span has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }
}

/// Resource descriptor attached to a span. Only the attributes the output
/// reconstruction needs are kept; currently that is `service.name`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceInfo {
    pub service_name: Option<String>,
}

/// Instrumentation scope descriptor attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeInfo {
    pub name: String,
}

/// The unit of storage: a span together with the resource and scope context
/// required to reconstruct it downstream. Owned exclusively by whichever of
/// the trace buffer, the reservoir, or a checkpoint record currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanWithContext {
    pub span: SpanRecord,
    pub resource: Option<ResourceInfo>,
    pub scope: Option<ScopeInfo>,
}

impl SpanWithContext {
    /// Stable 64-bit key for this span, see [`fingerprint`].
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.span.trace_id, &self.span.span_id)
    }
}

/// Step-by-step construction of a [`SpanWithContext`], for hosts adapting
/// their own span representation and for tests.
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    span: SpanRecord,
    resource: Option<ResourceInfo>,
    scope: Option<ScopeInfo>,
}

impl SpanBuilder {
    pub fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            span: SpanRecord {
                trace_id,
                span_id,
                parent_span_id: SpanId([0; 8]),
                name: String::new(),
                start_time_unix_nanos: 0,
                end_time_unix_nanos: 0,
            },
            resource: None,
            scope: None,
        }
    }

    pub fn parent(mut self, parent: SpanId) -> Self {
        self.span.parent_span_id = parent;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.span.name = name.into();
        self
    }

    pub fn times(mut self, start_unix_nanos: u64, end_unix_nanos: u64) -> Self {
        self.span.start_time_unix_nanos = start_unix_nanos;
        self.span.end_time_unix_nanos = end_unix_nanos;
        self
    }

    pub fn service_name(mut self, service: impl Into<String>) -> Self {
        self.resource = Some(ResourceInfo {
            service_name: Some(service.into()),
        });
        self
    }

    pub fn scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope = Some(ScopeInfo { name: name.into() });
        self
    }

    pub fn build(self) -> SpanWithContext {
        SpanWithContext {
            span: self.span,
            resource: self.resource,
            scope: self.scope,
        }
    }
}

/// 64-bit hash over `trace_id ‖ span_id`, stable across processes, used as
/// the reservoir's internal key. Collisions are treated as identity; the
/// probability is negligible for any realistic reservoir size.
pub fn fingerprint(trace_id: &TraceId, span_id: &SpanId) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&trace_id.0);
    hasher.update(&span_id.0);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}

//! Binary wire formats for checkpoint records. Big-endian throughout.
//!
//! A span record is a fixed 20-byte header followed by three length-prefixed
//! sections (span, resource, scope). Section sizes are authoritative: a
//! reader ignores trailing bytes inside a section, so future writers can
//! append fields without breaking old readers. The magic and version bytes
//! are checked strictly.

use bytes::{Buf, BufMut};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use weir_core::{
    Error, ResourceInfo, Result, ScopeInfo, SpanId, SpanRecord, SpanWithContext, TraceId,
};

const MAGIC: [u8; 4] = *b"SPAN";
const VERSION: u8 = 0x01;
const HEADER_LEN: usize = 20;

/// The only resource attribute the checkpoint currently carries.
const SERVICE_NAME_KEY: &str = "service.name";

/// Length of the encoded window state record: four 8-byte integers.
pub const STATE_RECORD_LEN: usize = 32;

/// Encode a span with its context into the checkpoint record layout.
pub fn encode_span(s: &SpanWithContext) -> Vec<u8> {
    let mut span_sec = Vec::with_capacity(52 + s.span.name.len());
    span_sec.put_slice(s.span.trace_id.as_bytes());
    span_sec.put_slice(s.span.span_id.as_bytes());
    span_sec.put_slice(s.span.parent_span_id.as_bytes());
    span_sec.put_u32(s.span.name.len() as u32);
    span_sec.put_slice(s.span.name.as_bytes());
    span_sec.put_u64(s.span.start_time_unix_nanos);
    span_sec.put_u64(s.span.end_time_unix_nanos);

    let mut resource_sec = Vec::new();
    if let Some(resource) = &s.resource {
        if let Some(service) = &resource.service_name {
            resource_sec.put_u32(SERVICE_NAME_KEY.len() as u32);
            resource_sec.put_slice(SERVICE_NAME_KEY.as_bytes());
            resource_sec.put_u32(service.len() as u32);
            resource_sec.put_slice(service.as_bytes());
        }
    }

    let mut scope_sec = Vec::new();
    if let Some(scope) = &s.scope {
        scope_sec.put_u32(scope.name.len() as u32);
        scope_sec.put_slice(scope.name.as_bytes());
    }

    let mut out =
        Vec::with_capacity(HEADER_LEN + span_sec.len() + resource_sec.len() + scope_sec.len());
    out.put_slice(&MAGIC);
    out.put_u8(VERSION);
    out.put_u8(1);
    out.put_u8(u8::from(s.resource.is_some()));
    out.put_u8(u8::from(s.scope.is_some()));
    out.put_u32(span_sec.len() as u32);
    out.put_u32(resource_sec.len() as u32);
    out.put_u32(scope_sec.len() as u32);
    out.put_slice(&span_sec);
    out.put_slice(&resource_sec);
    out.put_slice(&scope_sec);
    out
}

/// Decode a checkpoint span record. Rejects on magic or version mismatch and
/// on any section shorter than its declared contents.
pub fn decode_span(buf: &[u8]) -> Result<SpanWithContext> {
    if buf.len() < HEADER_LEN {
        return Err(Error::codec("span record shorter than header"));
    }
    if buf[..4] != MAGIC {
        return Err(Error::codec("bad span record magic"));
    }
    if buf[4] != VERSION {
        return Err(Error::codec(format!("unsupported span record version {}", buf[4])));
    }
    let span_present = buf[5] != 0;
    let resource_present = buf[6] != 0;
    let scope_present = buf[7] != 0;
    if !span_present {
        return Err(Error::codec("span section missing"));
    }

    let mut header = &buf[8..HEADER_LEN];
    let span_size = header.get_u32() as usize;
    let resource_size = header.get_u32() as usize;
    let scope_size = header.get_u32() as usize;
    let total = HEADER_LEN
        .checked_add(span_size)
        .and_then(|n| n.checked_add(resource_size))
        .and_then(|n| n.checked_add(scope_size))
        .ok_or_else(|| Error::codec("span record sizes overflow"))?;
    if buf.len() < total {
        return Err(Error::codec("span record truncated"));
    }

    let span_sec = &buf[HEADER_LEN..HEADER_LEN + span_size];
    let resource_sec = &buf[HEADER_LEN + span_size..HEADER_LEN + span_size + resource_size];
    let scope_sec = &buf[HEADER_LEN + span_size + resource_size..total];

    let span = decode_span_section(span_sec)?;
    let resource = if resource_present {
        Some(decode_resource_section(resource_sec)?)
    } else {
        None
    };
    let scope = if scope_present {
        Some(decode_scope_section(scope_sec)?)
    } else {
        None
    };

    Ok(SpanWithContext {
        span,
        resource,
        scope,
    })
}

fn decode_span_section(mut sec: &[u8]) -> Result<SpanRecord> {
    if sec.remaining() < 16 + 8 + 8 + 4 {
        return Err(Error::codec("span section truncated"));
    }
    let mut trace_id = [0u8; 16];
    sec.copy_to_slice(&mut trace_id);
    let mut span_id = [0u8; 8];
    sec.copy_to_slice(&mut span_id);
    let mut parent_span_id = [0u8; 8];
    sec.copy_to_slice(&mut parent_span_id);
    let name = read_string(&mut sec, "span name")?;
    if sec.remaining() < 16 {
        return Err(Error::codec("span section missing timestamps"));
    }
    let start_time_unix_nanos = sec.get_u64();
    let end_time_unix_nanos = sec.get_u64();
    // Trailing bytes within the section belong to future versions.
    Ok(SpanRecord {
        trace_id: TraceId(trace_id),
        span_id: SpanId(span_id),
        parent_span_id: SpanId(parent_span_id),
        name,
        start_time_unix_nanos,
        end_time_unix_nanos,
    })
}

fn decode_resource_section(mut sec: &[u8]) -> Result<ResourceInfo> {
    let mut resource = ResourceInfo::default();
    while sec.remaining() >= 8 {
        let key = read_string(&mut sec, "resource attribute key")?;
        let value = read_string(&mut sec, "resource attribute value")?;
        if key == SERVICE_NAME_KEY {
            resource.service_name = Some(value);
        }
    }
    Ok(resource)
}

fn decode_scope_section(mut sec: &[u8]) -> Result<ScopeInfo> {
    let name = read_string(&mut sec, "scope name")?;
    Ok(ScopeInfo { name })
}

fn read_string(sec: &mut &[u8], what: &str) -> Result<String> {
    if sec.remaining() < 4 {
        return Err(Error::codec(format!("{what}: missing length")));
    }
    let len = sec.get_u32() as usize;
    if sec.remaining() < len {
        return Err(Error::codec(format!("{what}: length overruns section")));
    }
    let mut raw = vec![0u8; len];
    sec.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| Error::codec(format!("{what}: invalid utf-8")))
}

/// Encode a window state record: `window_id | start_unix | end_unix |
/// seen_count`, each 8 bytes big-endian.
pub fn encode_state(window_id: u64, start_unix: u64, end_unix: u64, seen: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(STATE_RECORD_LEN);
    out.put_u64(window_id);
    out.put_u64(start_unix);
    out.put_u64(end_unix);
    out.put_u64(seen);
    out
}

/// Decode a window state record.
pub fn decode_state(buf: &[u8]) -> Result<(u64, u64, u64, u64)> {
    if buf.len() < STATE_RECORD_LEN {
        return Err(Error::codec("state record truncated"));
    }
    let mut buf = &buf[..STATE_RECORD_LEN];
    Ok((buf.get_u64(), buf.get_u64(), buf.get_u64(), buf.get_u64()))
}

/// Whole seconds since the unix epoch; times before the epoch clamp to zero.
pub fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Inverse of [`unix_secs`].
pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#![forbid(unsafe_code)]

//! Core types for the weir sampling stage: the span data model, the stable
//! span fingerprint, processor configuration, and the shared error type.

pub mod config;
pub mod error;
pub mod span;

pub use config::WeirConfig;
pub use error::{Error, Result};
pub use span::{
    fingerprint, ResourceInfo, ScopeInfo, SpanBuilder, SpanId, SpanRecord, SpanWithContext,
    TraceId,
};

#![forbid(unsafe_code)]

//! Sampling processor facade for the weir pipeline stage.
//!
//! Wire a [`SamplingProcessor`] between a span receiver and an exporter:
//! feed batches through [`SamplingProcessor::consume_traces`], implement
//! [`DownstreamConsumer`] to receive each window's drained sample, and call
//! `start`/`shutdown` around the processor's lifetime.

pub mod downstream;
pub mod metrics;
pub mod processor;

pub use downstream::{CollectingConsumer, DownstreamConsumer, LoggingConsumer};
pub use metrics::{dump_prometheus, Metrics};
pub use processor::{ProcessorState, SamplingProcessor};

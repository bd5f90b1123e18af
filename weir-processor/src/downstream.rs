//! Contract between the sampler and whatever exports the sampled spans.

use parking_lot::Mutex;
use tracing::info;

use weir_core::{Result, SpanWithContext};

/// Receives each window's drained sample. Implementations are called
/// synchronously during rollover, so they should hand off to their own
/// batching/export machinery rather than block.
///
/// Delivery is at-least-once across process restarts; consumers must
/// tolerate duplicates.
pub trait DownstreamConsumer: Send + Sync {
    fn consume(&self, spans: Vec<SpanWithContext>) -> Result<()>;
}

/// Default consumer that only logs batch sizes. Useful while wiring a
/// pipeline up.
#[derive(Debug, Default)]
pub struct LoggingConsumer;

impl DownstreamConsumer for LoggingConsumer {
    fn consume(&self, spans: Vec<SpanWithContext>) -> Result<()> {
        info!(spans = spans.len(), "drained sample batch");
        Ok(())
    }
}

/// Test double retaining every drained batch.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    batches: Mutex<Vec<Vec<SpanWithContext>>>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drained batches in emission order.
    pub fn batches(&self) -> Vec<Vec<SpanWithContext>> {
        self.batches.lock().clone()
    }

    /// All spans received, across batches.
    pub fn spans(&self) -> Vec<SpanWithContext> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn span_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

impl DownstreamConsumer for CollectingConsumer {
    fn consume(&self, spans: Vec<SpanWithContext>) -> Result<()> {
        self.batches.lock().push(spans);
        Ok(())
    }
}

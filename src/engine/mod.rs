//! Spread analysis over paired price series.

pub mod spread;
pub mod types;

pub use spread::SpreadDetector;
pub use types::{MarketDataPayload, Signal};

/// Seam between the consumer loop and the analysis logic. A failure here is
/// a processing error, not a verdict: the message is requeued. "No signal"
/// is the `Ok(None)` case.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, payload: &MarketDataPayload) -> anyhow::Result<Option<Signal>>;
}

impl Analyzer for SpreadDetector {
    fn analyze(&self, payload: &MarketDataPayload) -> anyhow::Result<Option<Signal>> {
        Ok(self.evaluate(payload))
    }
}

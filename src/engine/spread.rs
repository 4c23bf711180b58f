use tracing::{debug, info, instrument, warn};

use crate::engine::types::{MarketDataPayload, Signal};

/// Rolling mean-absolute-spread detector over the tail of two price series.
///
/// Evaluation is pure with respect to the payload: the detector holds only
/// its tuning, so the same payload always yields the same verdict. Payloads
/// the detector cannot score (missing data, mismatched series) produce no
/// signal rather than an error; the message is still counted as consumed.
#[derive(Debug, Clone, Copy)]
pub struct SpreadDetector {
    lookback: usize,
    threshold: f64,
}

impl SpreadDetector {
    pub fn new(lookback: usize, threshold: f64) -> Self {
        Self {
            lookback,
            threshold,
        }
    }

    #[instrument(
        target = "engine",
        skip(self, payload),
        fields(symbol_a = %payload.symbol_a, symbol_b = %payload.symbol_b)
    )]
    pub fn evaluate(&self, payload: &MarketDataPayload) -> Option<Signal> {
        let prices_a = payload.prices_a.as_deref().unwrap_or_default();
        let prices_b = payload.prices_b.as_deref().unwrap_or_default();

        if prices_a.is_empty() || prices_b.is_empty() {
            warn!("payload is missing price data; skipping");
            return None;
        }

        let window_a = tail(prices_a, self.lookback);
        let window_b = tail(prices_b, self.lookback);

        if window_a.len() != window_b.len() {
            warn!(
                len_a = window_a.len(),
                len_b = window_b.len(),
                "price series differ in length after trimming; skipping"
            );
            return None;
        }

        if window_a.is_empty() {
            warn!("lookback window is empty; skipping");
            return None;
        }

        let avg_spread = average_absolute_spread(window_a, window_b);

        debug!(
            avg_spread,
            threshold = self.threshold,
            window = window_a.len(),
            "spread computed"
        );

        if avg_spread >= self.threshold {
            info!(avg_spread, "arbitrage opportunity detected");
            Some(Signal::arbitrage(
                payload.symbol_a.clone(),
                payload.symbol_b.clone(),
                avg_spread,
                payload.timestamp.clone(),
            ))
        } else {
            None
        }
    }
}

/// Last `n` elements of `series`, or the whole series when shorter.
fn tail(series: &[f64], n: usize) -> &[f64] {
    &series[series.len().saturating_sub(n)..]
}

/// Mean of the element-wise absolute differences. Both slices must be the
/// same non-zero length.
fn average_absolute_spread(a: &[f64], b: &[f64]) -> f64 {
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    sum / a.len() as f64
}

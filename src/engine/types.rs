use serde::{Deserialize, Serialize};

/// Inbound market data for one symbol pair, as delivered on the queue.
///
/// The price series are optional so a payload that omits them still
/// deserializes; the analyzer treats absent series the same as empty
/// ones. The identifying fields are mandatory, a payload without them
/// is malformed.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MarketDataPayload {
    pub symbol_a: String,
    pub symbol_b: String,
    pub prices_a: Option<Vec<f64>>,
    pub prices_b: Option<Vec<f64>>,
    pub timestamp: String,
}

pub const SIGNAL_TYPE: &str = "arbitrage_signal";
pub const SIGNAL_SOURCE: &str = "ArbEngine";

/// Outbound arbitrage signal. Field order matters on the wire: consumers
/// downstream pattern-match on the serialized form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol_a: String,
    pub symbol_b: String,
    pub avg_spread: f64,
    pub timestamp: String,
    pub source: String,
}

impl Signal {
    /// Builds an arbitrage signal carrying the originating payload's
    /// timestamp, not the detection time.
    pub fn arbitrage(
        symbol_a: impl Into<String>,
        symbol_b: impl Into<String>,
        avg_spread: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            kind: SIGNAL_TYPE.to_string(),
            symbol_a: symbol_a.into(),
            symbol_b: symbol_b.into(),
            avg_spread,
            timestamp: timestamp.into(),
            source: SIGNAL_SOURCE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_with_missing_series_deserializes() {
        let payload: MarketDataPayload = serde_json::from_str(
            r#"{"symbol_a":"AAPL","symbol_b":"MSFT","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("series are optional");

        assert_eq!(payload.symbol_a, "AAPL");
        assert_eq!(payload.prices_a, None);
        assert_eq!(payload.prices_b, None);
    }

    #[test]
    fn payload_without_symbols_is_rejected() {
        let result = serde_json::from_str::<MarketDataPayload>(
            r#"{"prices_a":[1.0],"prices_b":[2.0],"timestamp":"2024-05-01T10:00:00Z"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn signal_wire_format_is_stable() {
        let signal = Signal::arbitrage("AAPL", "MSFT", 1.5, "2024-05-01T10:00:00Z");
        let body = serde_json::to_string(&signal).expect("signal serializes");

        assert_eq!(
            body,
            r#"{"type":"arbitrage_signal","symbol_a":"AAPL","symbol_b":"MSFT","avg_spread":1.5,"timestamp":"2024-05-01T10:00:00Z","source":"ArbEngine"}"#
        );
    }
}

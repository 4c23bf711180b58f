use tracing::{error, info};

use crate::config::OutputMode;
use crate::engine::Signal;
use crate::queue::QueueBackend;

/// Fans a detected signal out to its sinks.
///
/// Stdout and the log always get the signal; the queue gets it unless the
/// output mode says otherwise. A failed queue publish is logged and
/// swallowed: losing one outbound signal must not take down consumption,
/// and the message that produced it is still acknowledged.
pub struct Publisher {
    mode: OutputMode,
}

impl Publisher {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub async fn send<B: QueueBackend>(&self, backend: &mut B, signal: &Signal) {
        let body = match serde_json::to_string(signal) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "signal failed to serialize");
                return;
            }
        };

        info!(
            symbol_a = %signal.symbol_a,
            symbol_b = %signal.symbol_b,
            avg_spread = signal.avg_spread,
            "sending signal to output"
        );

        // Readable copy for stdout; `body` stays the wire form.
        let pretty = serde_json::to_string_pretty(signal).unwrap_or_else(|_| body.clone());
        println!("{pretty}");

        if self.mode == OutputMode::Log {
            info!("output mode is log; skipping queue publish");
            return;
        }

        match backend.publish(body.as_bytes()).await {
            Ok(()) => info!("signal published to queue"),
            Err(err) => error!(error = %err, "signal publish failed; continuing"),
        }
    }
}

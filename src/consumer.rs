use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::engine::{Analyzer, MarketDataPayload};
use crate::error::ProcessingError;
use crate::publisher::Publisher;
use crate::queue::{DeliveryHandle, InboundMessage, QueueBackend, QueueError};

/// Longest payload prefix reproduced in error logs.
const LOG_PAYLOAD_LIMIT: usize = 256;

/// Sequential message pump: receive, analyze, settle, one message at a time.
///
/// There is deliberately no concurrency here. Ordering within the queue is
/// preserved and a poisonous payload can only ever hold up itself.
pub struct Consumer<B, A> {
    backend: B,
    analyzer: A,
    publisher: Publisher,
}

impl<B, A> Consumer<B, A>
where
    B: QueueBackend,
    A: Analyzer,
{
    pub fn new(backend: B, analyzer: A, publisher: Publisher) -> Self {
        Self {
            backend,
            analyzer,
            publisher,
        }
    }

    /// Drives the consume loop until shutdown is signalled or the transport
    /// fails beyond recovery.
    ///
    /// A shutdown observed mid-batch finishes the message in flight,
    /// settles it, and only then stops. Receive failures hand control to
    /// the backend's `recover`; if that fails too, the error propagates
    /// and the process ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        info!("consumer started; waiting for messages");

        'listen: loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break 'listen,
                received = self.backend.receive() => received,
            };

            match received {
                Ok(batch) => {
                    for message in batch {
                        let span = info_span!("message", handle = %message.handle);
                        self.handle_message(message).instrument(span).await;

                        if *shutdown.borrow() {
                            break 'listen;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "receive failed; recovering transport");
                    self.backend.recover().await?;
                }
            }
        }

        info!("shutdown requested; closing transport");
        if let Err(err) = self.backend.close().await {
            warn!(error = %err, "transport close failed");
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        let InboundMessage { body, handle } = message;
        let outcome = self.process(&body).await;
        self.settle(&handle, outcome).await;
    }

    /// Decode, analyze, publish. The error variant classifies the failure
    /// so `settle` knows whether the delivery deserves another attempt.
    async fn process(&mut self, body: &[u8]) -> Result<(), ProcessingError> {
        let payload: MarketDataPayload = serde_json::from_slice(body).map_err(|err| {
            error!(error = %err, payload = %truncate_for_log(body), "malformed payload");
            ProcessingError::from(err)
        })?;

        info!(
            symbol_a = %payload.symbol_a,
            symbol_b = %payload.symbol_b,
            "market data received"
        );

        let verdict = self.analyzer.analyze(&payload).map_err(|err| {
            error!(
                symbol_a = %payload.symbol_a,
                symbol_b = %payload.symbol_b,
                error = %err,
                "analysis failed"
            );
            ProcessingError::Transient(err)
        })?;

        if let Some(signal) = verdict {
            self.publisher.send(&mut self.backend, &signal).await;
        }

        Ok(())
    }

    /// Settles the delivery exactly once. A failed settlement call is
    /// logged and dropped; the transport's redelivery semantics cover the
    /// message from there.
    async fn settle(&mut self, handle: &DeliveryHandle, outcome: Result<(), ProcessingError>) {
        match outcome {
            Ok(()) => match self.backend.acknowledge(handle).await {
                Ok(()) => debug!("message acknowledged"),
                Err(err) => error!(error = %err, "acknowledge failed"),
            },
            Err(processing) => {
                let requeue = processing.requeue();
                match self.backend.reject(handle, requeue).await {
                    Ok(()) => warn!(requeue, "message rejected"),
                    Err(err) => error!(error = %err, "reject failed"),
                }
            }
        }
    }
}

fn truncate_for_log(body: &[u8]) -> String {
    let end = body.len().min(LOG_PAYLOAD_LIMIT);
    let mut rendered = String::from_utf8_lossy(&body[..end]).into_owned();
    if body.len() > LOG_PAYLOAD_LIMIT {
        rendered.push_str("...");
    }
    rendered
}

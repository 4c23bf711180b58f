//! Queue transports.
//!
//! Both backends surface the same pull-shaped interface: `receive` yields a
//! batch (a broker push stream degenerates to batches of one), and every
//! message carries the opaque handle its own settlement needs. The consumer
//! loop never branches on which transport it is driving.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub mod rabbitmq;
pub mod sqs;

pub use rabbitmq::RabbitMqBackend;
pub use sqs::SqsBackend;

/// Connection attempts before startup gives up.
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Pause between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("amqp failure: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("sqs failure: {0}")]
    Sqs(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("delivery stream closed by the broker")]
    StreamClosed,

    #[error("delivery handle does not belong to this backend: {0}")]
    HandleMismatch(String),
}

/// Settlement token for one delivery. Which variant a backend hands out is
/// fixed per transport; receiving the other variant back is a bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryHandle {
    /// Broker channel-scoped tag; only valid on the channel that
    /// delivered it.
    Broker { delivery_tag: u64 },

    /// SQS receipt handle plus the message id for logging.
    Polling {
        receipt_handle: String,
        message_id: String,
    },
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryHandle::Broker { delivery_tag } => write!(f, "tag {delivery_tag}"),
            DeliveryHandle::Polling { message_id, .. } => write!(f, "message {message_id}"),
        }
    }
}

/// One received delivery: raw body bytes plus its settlement handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub handle: DeliveryHandle,
}

/// Transport seam for the consumer loop.
///
/// `receive` blocks until at least one message arrives (or fails), and every
/// yielded message must be settled exactly once with `acknowledge` or
/// `reject`. `recover` is invoked after a `receive` failure and either
/// restores the transport or returns the error that stops the service.
#[async_trait]
pub trait QueueBackend: Send {
    async fn receive(&mut self) -> Result<Vec<InboundMessage>, QueueError>;

    async fn acknowledge(&mut self, handle: &DeliveryHandle) -> Result<(), QueueError>;

    /// Negatively settle a delivery. `requeue` asks the transport to make
    /// the message available again; transports without an explicit reject
    /// treat this as a no-op and rely on redelivery timeouts.
    async fn reject(&mut self, handle: &DeliveryHandle, requeue: bool) -> Result<(), QueueError>;

    async fn publish(&mut self, body: &[u8]) -> Result<(), QueueError>;

    async fn recover(&mut self) -> Result<(), QueueError>;

    async fn close(&mut self) -> Result<(), QueueError>;
}

/// Runs `op` up to `attempts` times, sleeping `delay` between failures.
/// The terminal error wraps the last failure so startup logs show what
/// actually went wrong.
pub(crate) async fn connect_with_retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let mut last = String::new();

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, attempts, error = %err, "connection attempt failed");
                last = err.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(QueueError::RetriesExhausted { attempts, last })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_once_the_target_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = connect_with_retry(5, Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueueError::Sqs("connection refused".to_string()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .expect("third attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_the_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = connect_with_retry::<u32, _, _>(5, Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::Sqs("connection refused".to_string()))
            }
        })
        .await
        .expect_err("all attempts fail");

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            QueueError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(last.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_success_skips_the_delay() {
        let value = connect_with_retry(5, Duration::from_secs(3600), || async { Ok(7u32) })
            .await
            .expect("immediate success");
        assert_eq!(value, 7);
    }

    #[test]
    fn handles_render_compactly() {
        let broker = DeliveryHandle::Broker { delivery_tag: 9 };
        assert_eq!(broker.to_string(), "tag 9");

        let polling = DeliveryHandle::Polling {
            receipt_handle: "AQEB...".to_string(),
            message_id: "m-1".to_string(),
        };
        assert_eq!(polling.to_string(), "message m-1");
    }
}

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use tracing::{debug, info, warn};

use crate::config::SqsConfig;
use crate::queue::{DeliveryHandle, InboundMessage, QueueBackend, QueueError};

/// Upper bound SQS allows per receive call.
const MAX_BATCH: i32 = 10;

/// Long-poll duration per receive call.
const WAIT_TIME_SECS: i32 = 10;

/// SQS transport: long-polled batches, deletion as acknowledgement.
///
/// SQS has no reject verb. An unacknowledged message reappears once its
/// visibility timeout lapses, so `reject` settles nothing and redelivery
/// cadence is owned by the queue's configuration.
pub struct SqsBackend {
    cfg: SqsConfig,
    client: Client,
}

impl SqsBackend {
    /// Builds the client from the shared AWS config chain (credentials and
    /// endpoints resolve the usual way); no traffic until the first poll.
    pub async fn connect(cfg: SqsConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .load()
            .await;
        let client = Client::new(&sdk_config);

        info!(queue_url = %cfg.queue_url, region = %cfg.region, "sqs client ready");

        Self { cfg, client }
    }
}

#[async_trait]
impl QueueBackend for SqsBackend {
    async fn receive(&mut self) -> Result<Vec<InboundMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.cfg.queue_url)
            .max_number_of_messages(MAX_BATCH)
            .wait_time_seconds(WAIT_TIME_SECS)
            .send()
            .await
            .map_err(into_sqs_err)?;

        let messages = output.messages.unwrap_or_default();
        debug!(count = messages.len(), "sqs poll returned");

        Ok(messages
            .into_iter()
            .filter_map(|message| {
                let Some(receipt_handle) = message.receipt_handle else {
                    warn!("sqs message arrived without a receipt handle; skipping");
                    return None;
                };

                Some(InboundMessage {
                    body: message.body.unwrap_or_default().into_bytes(),
                    handle: DeliveryHandle::Polling {
                        receipt_handle,
                        message_id: message.message_id.unwrap_or_default(),
                    },
                })
            })
            .collect())
    }

    async fn acknowledge(&mut self, handle: &DeliveryHandle) -> Result<(), QueueError> {
        let receipt = polling_receipt(handle)?;

        self.client
            .delete_message()
            .queue_url(&self.cfg.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(into_sqs_err)?;

        debug!(%handle, "sqs message deleted");
        Ok(())
    }

    async fn reject(&mut self, handle: &DeliveryHandle, requeue: bool) -> Result<(), QueueError> {
        polling_receipt(handle)?;

        // Nothing to send: the visibility timeout redelivers on its own.
        debug!(%handle, requeue, "leaving sqs message unacknowledged");
        Ok(())
    }

    async fn publish(&mut self, body: &[u8]) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.cfg.queue_url)
            .message_body(String::from_utf8_lossy(body).into_owned())
            .send()
            .await
            .map_err(into_sqs_err)?;
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), QueueError> {
        debug!(delay = ?self.cfg.poll_error_delay, "pausing before the next sqs poll");
        tokio::time::sleep(self.cfg.poll_error_delay).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        Ok(())
    }
}

fn polling_receipt(handle: &DeliveryHandle) -> Result<&str, QueueError> {
    match handle {
        DeliveryHandle::Polling { receipt_handle, .. } => Ok(receipt_handle),
        other => Err(QueueError::HandleMismatch(other.to_string())),
    }
}

fn into_sqs_err<E, R>(err: SdkError<E, R>) -> QueueError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    QueueError::Sqs(DisplayErrorContext(err).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_polling_handles_are_accepted() {
        let handle = DeliveryHandle::Polling {
            receipt_handle: "AQEB".to_string(),
            message_id: "m-1".to_string(),
        };
        assert_eq!(polling_receipt(&handle).unwrap(), "AQEB");

        let err = polling_receipt(&DeliveryHandle::Broker { delivery_tag: 1 }).unwrap_err();
        assert!(matches!(err, QueueError::HandleMismatch(_)));
    }
}

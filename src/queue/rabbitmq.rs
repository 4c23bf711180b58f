use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info, warn};

use crate::config::RabbitMqConfig;
use crate::queue::{
    CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY, DeliveryHandle, InboundMessage, QueueBackend,
    QueueError, connect_with_retry,
};

const CONSUMER_TAG: &str = "arb-engine";

/// RabbitMQ transport: durable topic exchange, durable queue bound to it,
/// push consumption over a single channel.
///
/// Settlement tags are channel-scoped, so acks and nacks go through the
/// same channel that delivered the message. `recover` rebuilds connection,
/// channel, topology and consumer from scratch.
pub struct RabbitMqBackend {
    cfg: RabbitMqConfig,
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl RabbitMqBackend {
    pub async fn connect(cfg: RabbitMqConfig) -> Result<Self, QueueError> {
        let (connection, channel, consumer) = establish(&cfg).await?;
        Ok(Self {
            cfg,
            connection,
            channel,
            consumer,
        })
    }
}

#[async_trait]
impl QueueBackend for RabbitMqBackend {
    async fn receive(&mut self) -> Result<Vec<InboundMessage>, QueueError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(vec![InboundMessage {
                handle: DeliveryHandle::Broker {
                    delivery_tag: delivery.delivery_tag,
                },
                body: delivery.data,
            }]),
            Some(Err(err)) => Err(err.into()),
            None => Err(QueueError::StreamClosed),
        }
    }

    async fn acknowledge(&mut self, handle: &DeliveryHandle) -> Result<(), QueueError> {
        let tag = broker_tag(handle)?;
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&mut self, handle: &DeliveryHandle, requeue: bool) -> Result<(), QueueError> {
        let tag = broker_tag(handle)?;
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn publish(&mut self, body: &[u8]) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                &self.cfg.exchange,
                &self.cfg.routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), QueueError> {
        warn!("re-establishing rabbitmq connection");
        let (connection, channel, consumer) = establish(&self.cfg).await?;

        // The old connection is usually already dead at this point.
        if let Err(err) = self.connection.close(200, "superseded").await {
            debug!(error = %err, "old connection refused close");
        }

        self.connection = connection;
        self.channel = channel;
        self.consumer = consumer;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}

async fn establish(
    cfg: &RabbitMqConfig,
) -> Result<(Connection, Channel, Consumer), QueueError> {
    let uri = amqp_uri(cfg);

    let connection = connect_with_retry(CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY, || {
        let uri = uri.clone();
        async move { Ok(Connection::connect_uri(uri, ConnectionProperties::default()).await?) }
    })
    .await?;

    info!(host = %cfg.host, port = cfg.port, vhost = %cfg.vhost, "connected to rabbitmq");

    let channel = connection.create_channel().await?;
    declare_topology(&channel, cfg).await?;

    let consumer = channel
        .basic_consume(
            &cfg.queue,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %cfg.queue, bind_key = %cfg.bind_key, "listening for messages on rabbitmq");

    Ok((connection, channel, consumer))
}

/// Declares the exchange, the consume queue and its binding. Everything is
/// durable; redeclaring existing durable entities is a no-op on the broker.
async fn declare_topology(channel: &Channel, cfg: &RabbitMqConfig) -> Result<(), QueueError> {
    channel
        .exchange_declare(
            &cfg.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut queue_args = FieldTable::default();

    if let Some(dlq) = &cfg.dead_letter_queue {
        channel
            .queue_declare(
                dlq,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        // Route dead letters through the default exchange straight into
        // the named queue.
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        queue_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dlq.as_str().into()),
        );
    }

    channel
        .queue_declare(
            &cfg.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            queue_args,
        )
        .await?;

    channel
        .queue_bind(
            &cfg.queue,
            &cfg.exchange,
            &cfg.bind_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

/// Builds the connection URI from parts. Constructing the struct directly
/// sidesteps percent-encoding the vhost (the default vhost is "/").
fn amqp_uri(cfg: &RabbitMqConfig) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: cfg.user.clone(),
                password: cfg.password.clone(),
            },
            host: cfg.host.clone(),
            port: cfg.port,
        },
        vhost: cfg.vhost.clone(),
        query: Default::default(),
    }
}

fn broker_tag(handle: &DeliveryHandle) -> Result<u64, QueueError> {
    match handle {
        DeliveryHandle::Broker { delivery_tag } => Ok(*delivery_tag),
        other => Err(QueueError::HandleMismatch(other.to_string())),
    }
}

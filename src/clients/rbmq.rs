use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};

use crate::{
    broker::{
        Acknowledger, BrokerError, FAILURE_CAUSE_HEADER, InboundMessage, MessagePublisher,
        MessageSource, OutboundMessage, Result, TopologyDeclarer,
    },
    config::Config,
    utils::retry_with_backoff,
};

/// Process-wide RabbitMQ handle: one connection, one publishing channel.
///
/// Consumers get a channel of their own so prefetch and delivery tags stay
/// per consumer.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    prefetch_count: u16,
}

impl RabbitMqClient {
    /// Connects, retrying with backoff while the broker is unreachable.
    pub async fn connect(config: &Config) -> Result<Self> {
        retry_with_backoff(&config.retry_config(), "connect to RabbitMQ", || {
            Self::connect_once(&config.rabbitmq_url, config.prefetch_count)
        })
        .await
    }

    async fn connect_once(url: &str, prefetch_count: u16) -> Result<Self> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Channel creation failed: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to enable confirms: {}", e)))?;

        info!("RabbitMQ connection established");

        Ok(Self {
            connection,
            channel,
            prefetch_count,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Starts consuming a durable work queue on a dedicated channel.
    pub async fn create_consumer(&self, queue: &str, consumer_tag: &str) -> Result<RabbitMqSource> {
        let channel = self.consumer_channel().await?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to create consumer: {}", e)))?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(RabbitMqSource { consumer, channel })
    }

    /// Declares a server-named, exclusive reply queue and consumes it without
    /// acknowledgements. Returns the queue name to use as `reply_to`.
    pub async fn reply_consumer(&self) -> Result<(String, RabbitMqSource)> {
        let channel = self.consumer_channel().await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("Failed to declare reply queue: {}", e)))?;

        let queue_name = queue.name().as_str().to_string();

        let consumer = channel
            .basic_consume(
                queue_name.as_str(),
                "reply_listener",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to consume reply queue: {}", e)))?;

        info!(queue = %queue_name, "Reply queue declared");

        Ok((queue_name, RabbitMqSource { consumer, channel }))
    }

    async fn consumer_channel(&self) -> Result<Channel> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Channel creation failed: {}", e)))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to set up QoS: {}", e)))?;

        Ok(channel)
    }

    fn properties(message: &OutboundMessage) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        if let Some(correlation_id) = &message.correlation_id {
            properties = properties.with_correlation_id(correlation_id.as_str().into());
        }

        if let Some(reply_to) = &message.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }

        if let Some(cause) = &message.failure_cause {
            let mut headers = FieldTable::default();
            headers.insert(
                FAILURE_CAUSE_HEADER.into(),
                AMQPValue::LongString(cause.as_str().into()),
            );
            properties = properties.with_headers(headers);
        }

        properties
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqClient {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let confirmation = self
            .channel
            .basic_publish(
                message.exchange.as_str(),
                message.routing_key.as_str(),
                BasicPublishOptions::default(),
                &message.payload,
                Self::properties(&message),
            )
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to publish message: {}", e)))?
            .await
            .map_err(|e| BrokerError::Publish(format!("Publisher confirm failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(format!(
                "Broker refused message for exchange '{}'",
                message.exchange
            )));
        }

        debug!(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            "Message published"
        );

        Ok(())
    }
}

#[async_trait]
impl TopologyDeclarer for RabbitMqClient {
    async fn declare_direct_exchange(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("Failed to declare exchange: {}", e)))
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("Failed to declare queue: {}", e)))?;

        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare(format!("Failed to bind queue: {}", e)))
    }
}

/// Messages of one queue, consumed on their own channel.
pub struct RabbitMqSource {
    consumer: Consumer,
    channel: Channel,
}

impl RabbitMqSource {
    /// Acknowledges deliveries of this source; tags are only valid on the
    /// channel that delivered them.
    pub fn acknowledger(&self) -> RabbitMqAcknowledger {
        RabbitMqAcknowledger {
            channel: self.channel.clone(),
        }
    }

    fn to_inbound(delivery: Delivery) -> InboundMessage {
        let properties = &delivery.properties;

        let failure_cause = properties.headers().as_ref().and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == FAILURE_CAUSE_HEADER)
                .and_then(|(_, value)| match value {
                    AMQPValue::LongString(cause) => {
                        Some(String::from_utf8_lossy(cause.as_bytes()).into_owned())
                    }
                    AMQPValue::ShortString(cause) => Some(cause.as_str().to_string()),
                    _ => None,
                })
        });

        InboundMessage {
            delivery_tag: delivery.delivery_tag,
            correlation_id: properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            reply_to: properties
                .reply_to()
                .as_ref()
                .map(|reply_to| reply_to.as_str().to_string()),
            failure_cause,
            payload: delivery.data.clone(),
        }
    }
}

#[async_trait]
impl MessageSource for RabbitMqSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage>> {
        let delivery = self.consumer.next().await?;

        Some(
            delivery
                .map(Self::to_inbound)
                .map_err(|e| BrokerError::Consume(format!("Consumer delivery error: {}", e))),
        )
    }
}

pub struct RabbitMqAcknowledger {
    channel: Channel,
}

#[async_trait]
impl Acknowledger for RabbitMqAcknowledger {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Acknowledge(format!("Failed to acknowledge message: {}", e)))
    }
}

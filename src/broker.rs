//! Broker abstraction shared by the publisher and the channel workers.
//!
//! The traits here are the seam between the dispatch logic and the message
//! broker. `clients::rbmq` implements them on top of RabbitMQ, and
//! `clients::memory` implements them in-process so the dispatch logic can be
//! exercised without a live broker.

use async_trait::async_trait;

/// Header carrying the optional failure cause of a delivery result.
pub const FAILURE_CAUSE_HEADER: &str = "x-failure-cause";

/// Exchange name that routes straight to the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by the broker layer.
///
/// Every variant means "we don't know what happened to the message", which is
/// why callers never fold these into a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Declaration failed: {0}")]
    Declare(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),
}

/// A message on its way to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub failure_cause: Option<String>,
}

impl OutboundMessage {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
            correlation_id: None,
            reply_to: None,
            failure_cause: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_failure_cause(mut self, cause: Option<String>) -> Self {
        self.failure_cause = cause;
        self
    }
}

/// A message pulled off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub failure_cause: Option<String>,
}

/// Publishes messages to an exchange.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Returns once the broker has accepted the message.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;
}

/// A stream of messages from a single queue.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the queue has been closed.
    async fn next_message(&mut self) -> Option<Result<InboundMessage>>;
}

/// Removes consumed messages from their queue.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()>;
}

/// Declares exchanges, queues and bindings.
///
/// Implementations must be idempotent: redeclaring an identical resource is a
/// no-op.
#[async_trait]
pub trait TopologyDeclarer: Send + Sync {
    async fn declare_direct_exchange(&self, exchange: &str) -> Result<()>;

    async fn declare_queue(&self, queue: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;
}

//! In-process broker with direct-exchange routing.
//!
//! Implements the same traits as the RabbitMQ client so the publisher, the
//! reply listener and the channel workers can run together inside one
//! process. Tracks unacknowledged deliveries so callers can check that
//! nothing is left for redelivery.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::broker::{
    Acknowledger, BrokerError, DEFAULT_EXCHANGE, InboundMessage, MessagePublisher, MessageSource,
    OutboundMessage, Result, TopologyDeclarer,
};

struct QueueState {
    sender: mpsc::UnboundedSender<InboundMessage>,
    receiver: Option<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    bindings: HashMap<String, BTreeSet<(String, String)>>,
    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, String>,
    acked: u64,
    next_delivery_tag: u64,
    published: Vec<OutboundMessage>,
    fail_on_publish: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts consuming `queue`. Each queue accepts a single consumer.
    ///
    /// With `auto_ack` the broker forgets a message as soon as it is handed
    /// out; otherwise it stays unacknowledged until `acknowledge` is called.
    pub async fn consume(&self, queue: &str, auto_ack: bool) -> Result<InMemorySource> {
        let mut state = self.state.lock().await;

        let receiver = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Consume(format!("Queue '{}' not declared", queue)))?
            .receiver
            .take()
            .ok_or_else(|| BrokerError::Consume(format!("Queue '{}' already consumed", queue)))?;

        Ok(InMemorySource {
            queue: queue.to_string(),
            receiver,
            auto_ack,
            state: Arc::clone(&self.state),
        })
    }

    /// Makes every subsequent publish fail as if the broker were unreachable.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Closes every queue; consumers drain what is left and then stop.
    pub async fn shutdown(&self) {
        self.state.lock().await.queues.clear();
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.published.clone()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn acked_count(&self) -> u64 {
        self.state.lock().await.acked
    }

    pub async fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().await.exchanges.contains(exchange)
    }

    pub async fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().await.queues.contains_key(queue)
    }

    pub async fn binding_count(&self, exchange: &str) -> usize {
        self.state
            .lock()
            .await
            .bindings
            .get(exchange)
            .map_or(0, BTreeSet::len)
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.fail_on_publish {
            return Err(BrokerError::Connection("Broker unreachable".to_string()));
        }

        let targets: Vec<String> = if message.exchange == DEFAULT_EXCHANGE {
            vec![message.routing_key.clone()]
        } else {
            if !state.exchanges.contains(&message.exchange) {
                return Err(BrokerError::Publish(format!(
                    "Exchange '{}' not declared",
                    message.exchange
                )));
            }

            state
                .bindings
                .get(&message.exchange)
                .map(|bindings| {
                    bindings
                        .iter()
                        .filter(|(key, _)| *key == message.routing_key)
                        .map(|(_, queue)| queue.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for queue in &targets {
            state.next_delivery_tag += 1;
            let delivery_tag = state.next_delivery_tag;

            let Some(target) = state.queues.get(queue) else {
                debug!(queue = %queue, "Dropping message for unknown queue");
                continue;
            };

            let _ = target.sender.send(InboundMessage {
                delivery_tag,
                payload: message.payload.clone(),
                correlation_id: message.correlation_id.clone(),
                reply_to: message.reply_to.clone(),
                failure_cause: message.failure_cause.clone(),
            });
        }

        state.published.push(message);

        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryBroker {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.unacked.remove(&delivery_tag).is_none() {
            return Err(BrokerError::Acknowledge(format!(
                "Unknown delivery tag {}",
                delivery_tag
            )));
        }

        state.acked += 1;
        Ok(())
    }
}

#[async_trait]
impl TopologyDeclarer for InMemoryBroker {
    async fn declare_direct_exchange(&self, exchange: &str) -> Result<()> {
        self.state.lock().await.exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Declare(format!(
                "Exchange '{}' not declared",
                exchange
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Declare(format!("Queue '{}' not declared", queue)));
        }

        state
            .bindings
            .entry(exchange.to_string())
            .or_default()
            .insert((routing_key.to_string(), queue.to_string()));

        Ok(())
    }
}

pub struct InMemorySource {
    queue: String,
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
    auto_ack: bool,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage>> {
        let message = self.receiver.recv().await?;

        if !self.auto_ack {
            self.state
                .lock()
                .await
                .unacked
                .insert(message.delivery_tag, self.queue.clone());
        }

        Some(Ok(message))
    }
}

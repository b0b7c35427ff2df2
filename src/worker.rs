//! Channel worker: consumes notification events for one channel, hands them
//! to the channel sender and replies with the outcome.
//!
//! Per message: `Received -> Sending -> (Succeeded | Failed) -> Replied`.
//! Whatever the sender does, the message ends up acknowledged and exactly one
//! delivery result is emitted. Failed deliveries are reported, never retried.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    broker::{
        Acknowledger, BrokerError, DEFAULT_EXCHANGE, InboundMessage, MessagePublisher,
        MessageSource, OutboundMessage,
    },
    models::{
        channel::ChannelKind,
        message::NotificationEvent,
        status::DeliveryResult,
    },
    sender::{ChannelSender, SendError},
    topology::ChannelTopology,
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker for {channel} cannot start: {source}")]
    Configuration {
        channel: ChannelKind,
        #[source]
        source: SendError,
    },

    #[error("Sender for {sender} cannot serve the {worker} channel")]
    ChannelMismatch {
        worker: ChannelKind,
        sender: ChannelKind,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    Sending,
    Succeeded,
    Failed,
    Replied,
}

#[derive(Clone)]
pub struct ChannelWorker {
    topology: ChannelTopology,
    sender: Arc<dyn ChannelSender>,
    broker: Arc<dyn MessagePublisher>,
    acker: Arc<dyn Acknowledger>,
    concurrency: usize,
}

impl ChannelWorker {
    /// Fails when the sender is misconfigured, so a broken worker never
    /// accepts traffic.
    pub fn new(
        topology: ChannelTopology,
        sender: Arc<dyn ChannelSender>,
        broker: Arc<dyn MessagePublisher>,
        acker: Arc<dyn Acknowledger>,
        concurrency: usize,
    ) -> Result<Self, WorkerError> {
        if sender.channel() != topology.channel {
            return Err(WorkerError::ChannelMismatch {
                worker: topology.channel,
                sender: sender.channel(),
            });
        }

        sender
            .check_configuration()
            .map_err(|source| WorkerError::Configuration {
                channel: topology.channel,
                source,
            })?;

        Ok(Self {
            topology,
            sender,
            broker,
            acker,
            concurrency: concurrency.max(1),
        })
    }

    pub fn channel(&self) -> ChannelKind {
        self.topology.channel
    }

    pub fn topology(&self) -> &ChannelTopology {
        &self.topology
    }

    /// Processes messages from `source` until it closes, with at most
    /// `concurrency` messages in flight.
    ///
    /// In-flight messages are finished before returning, also when the source
    /// fails.
    pub async fn run<S>(&self, mut source: S) -> Result<(), WorkerError>
    where
        S: MessageSource,
    {
        info!(
            channel = %self.channel(),
            queue = %self.topology.queue,
            provider = self.sender.provider(),
            concurrency = self.concurrency,
            "Channel worker started"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut outcome = Ok(());

        while let Some(message) = source.next_message().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    error!(channel = %self.channel(), error = %e, "Consumer failed");
                    outcome = Err(WorkerError::Broker(e));
                    break;
                }
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };

            let worker = self.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.process(message).await;
            });

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!(channel = %self.channel(), error = %e, "Message task aborted");
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!(channel = %self.channel(), error = %e, "Message task aborted");
            }
        }

        info!(channel = %self.channel(), "Channel worker stopped");

        outcome
    }

    /// Handles one consumed message end to end and returns the result that
    /// was replied.
    pub async fn process(&self, message: InboundMessage) -> DeliveryResult {
        let correlation_id = message.correlation_id.clone().unwrap_or_default();
        self.transition(&correlation_id, MessageState::Received);

        let result = match NotificationEvent::decode(self.channel(), &correlation_id, &message.payload)
        {
            Ok(event) => self.deliver(&event).await,
            Err(e) => {
                warn!(
                    correlation_id = %correlation_id,
                    channel = %self.channel(),
                    error = %e,
                    "Rejecting undeliverable event"
                );
                self.transition(&correlation_id, MessageState::Failed);
                DeliveryResult::failed(correlation_id.clone(), e.to_string())
            }
        };

        self.reply(&message, &result).await;
        self.transition(&correlation_id, MessageState::Replied);

        if let Err(e) = self.acker.acknowledge(message.delivery_tag).await {
            error!(
                correlation_id = %correlation_id,
                delivery_tag = message.delivery_tag,
                error = %e,
                "Failed to acknowledge message"
            );
        }

        result
    }

    async fn deliver(&self, event: &NotificationEvent) -> DeliveryResult {
        self.transition(&event.correlation_id, MessageState::Sending);

        let template_data = event.template_data();
        let send = self.sender.send(&event.recipient, &template_data);

        let outcome = match AssertUnwindSafe(send).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(SendError::Provider("sender panicked".to_string())),
        };

        match outcome {
            Ok(()) => {
                self.transition(&event.correlation_id, MessageState::Succeeded);
                info!(
                    correlation_id = %event.correlation_id,
                    channel = %self.channel(),
                    "Notification delivered"
                );
                DeliveryResult::success(event.correlation_id.clone())
            }
            Err(e) => {
                self.transition(&event.correlation_id, MessageState::Failed);
                warn!(
                    correlation_id = %event.correlation_id,
                    channel = %self.channel(),
                    error = %e,
                    "Notification delivery failed"
                );
                DeliveryResult::failed(event.correlation_id.clone(), e.to_string())
            }
        }
    }

    /// Replies to the request's reply address, or to the channel's status
    /// queue when the event carried none.
    async fn reply(&self, message: &InboundMessage, result: &DeliveryResult) {
        let body = result.status.encode();

        let mut outbound = match message.reply_to.as_deref().filter(|r| !r.is_empty()) {
            Some(reply_to) => OutboundMessage::new(DEFAULT_EXCHANGE, reply_to, body),
            None => OutboundMessage::new(
                &self.topology.exchange,
                &self.topology.status_routing_key,
                body,
            ),
        }
        .with_failure_cause(result.cause.clone());

        if !result.correlation_id.is_empty() {
            outbound = outbound.with_correlation_id(result.correlation_id.clone());
        }

        let destination = outbound.routing_key.clone();

        match self.broker.publish(outbound).await {
            Ok(()) => debug!(
                correlation_id = %result.correlation_id,
                destination = %destination,
                status = %result.status,
                "Delivery result replied"
            ),
            Err(e) => error!(
                correlation_id = %result.correlation_id,
                destination = %destination,
                error = %e,
                "Failed to publish delivery result"
            ),
        }
    }

    fn transition(&self, correlation_id: &str, state: MessageState) {
        debug!(
            correlation_id,
            channel = %self.channel(),
            state = ?state,
            "Message state changed"
        );
    }
}

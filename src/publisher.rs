//! Event publisher: the outward-facing side of the dispatcher.
//!
//! `publish_and_await` turns the asynchronous broker round trip into a call
//! that reports the channel outcome within a bounded time. Replies come back
//! on a queue private to this publisher and are matched to callers by the
//! correlation registry.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    broker::{BrokerError, InboundMessage, MessagePublisher, MessageSource, OutboundMessage},
    clients::rbmq::RabbitMqClient,
    config::Config,
    models::{
        channel::ChannelKind,
        message::{NotificationEvent, NotificationRequest},
        status::{DeliveryResult, DeliveryStatus},
        validation::ValidationError,
    },
    registry::{CorrelationRegistry, RegistryError, deadline_after},
    topology::Topology,
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid notification: {0}")]
    Validation(#[from] ValidationError),

    /// The broker did not accept the event; its fate is unknown.
    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("No topology configured for channel {0}")]
    UnknownChannel(ChannelKind),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Closed => replies_lost(),
            other => DispatchError::Registry(other),
        }
    }
}

fn replies_lost() -> DispatchError {
    DispatchError::Broker(BrokerError::Consume(
        "Reply listener stopped, results can no longer be received".to_string(),
    ))
}

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EventPublisher {
    broker: Arc<dyn MessagePublisher>,
    topology: Topology,
    registry: Arc<CorrelationRegistry>,
    reply_to: String,
    reply_timeout: Duration,
    listening: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EventPublisher {
    /// Starts a publisher whose replies arrive on `reply_queue`, consumed
    /// through `replies`.
    ///
    /// Spawns the reply listener and the registry reaper; both stop when the
    /// publisher is dropped.
    pub fn start<S>(
        broker: Arc<dyn MessagePublisher>,
        topology: Topology,
        reply_queue: impl Into<String>,
        replies: S,
        reaper_interval: Duration,
    ) -> Self
    where
        S: MessageSource + 'static,
    {
        let registry = Arc::new(CorrelationRegistry::new());
        let reply_to = reply_queue.into();

        let listening = Arc::new(AtomicBool::new(true));

        let listener_registry = Arc::clone(&registry);
        let listener_state = Arc::clone(&listening);
        let listener_queue = reply_to.clone();
        let listener = tokio::spawn(async move {
            match run_reply_listener(replies, Arc::clone(&listener_registry)).await {
                Ok(()) => warn!(queue = %listener_queue, "Reply source closed"),
                Err(e) => error!(queue = %listener_queue, error = %e, "Reply listener stopped"),
            }

            listener_state.store(false, Ordering::SeqCst);
            let abandoned = listener_registry.close();
            if abandoned > 0 {
                warn!(abandoned, "Pending requests released without a reply");
            }
        });

        let reaper = registry.spawn_reaper(reaper_interval);

        info!(reply_queue = %reply_to, "Event publisher started");

        Self {
            broker,
            topology,
            registry,
            reply_to,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            listening,
            tasks: vec![listener, reaper],
        }
    }

    /// Opens a private reply queue on `client` and starts a publisher with
    /// the reply timeout and reaper interval from `config`.
    pub async fn connect(
        client: Arc<RabbitMqClient>,
        topology: Topology,
        config: &Config,
    ) -> Result<Self, BrokerError> {
        let (reply_queue, replies) = client.reply_consumer().await?;

        Ok(
            Self::start(client, topology, reply_queue, replies, config.reaper_interval())
                .with_reply_timeout(config.reply_timeout()),
        )
    }

    /// Timeout used by `dispatch`.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Whether replies are still being received.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_to
    }

    /// Sends the event and returns once the broker has accepted it.
    ///
    /// Returns the correlation id the event was sent with.
    pub async fn publish_fire_and_forget(
        &self,
        request: NotificationRequest,
    ) -> Result<String, DispatchError> {
        let event = Self::prepare(request)?;
        let message = self.outbound(&event)?;

        self.broker.publish(message).await?;

        info!(
            correlation_id = %event.correlation_id,
            channel = %event.channel,
            "Notification event published"
        );

        Ok(event.correlation_id)
    }

    /// Sends the event and waits up to `timeout` for the worker's result.
    ///
    /// A missing reply yields a timeout-flavoured `FAILED` result. A broker
    /// that refuses the event, or a reply queue that stopped delivering,
    /// yields `DispatchError::Broker`.
    pub async fn publish_and_await(
        &self,
        request: NotificationRequest,
        timeout: Duration,
    ) -> Result<DeliveryResult, DispatchError> {
        let event = Self::prepare(request)?;
        let message = self
            .outbound(&event)?
            .with_reply_to(self.reply_to.clone());

        if !self.is_listening() {
            return Err(replies_lost());
        }

        let handle = self
            .registry
            .register(event.correlation_id.clone(), deadline_after(timeout))?;

        if let Err(e) = self.broker.publish(message).await {
            self.registry.cancel(&event.correlation_id);
            warn!(
                correlation_id = %event.correlation_id,
                channel = %event.channel,
                error = %e,
                "Failed to publish notification event"
            );
            return Err(DispatchError::Broker(e));
        }

        debug!(
            correlation_id = %event.correlation_id,
            channel = %event.channel,
            timeout_ms = timeout.as_millis() as u64,
            "Awaiting delivery result"
        );

        let result = self.registry.wait(handle, timeout).await;

        if result.timed_out && !self.is_listening() {
            warn!(
                correlation_id = %result.correlation_id,
                channel = %event.channel,
                "Reply listener stopped while awaiting delivery result"
            );
            return Err(replies_lost());
        }

        info!(
            correlation_id = %result.correlation_id,
            channel = %event.channel,
            status = %result.status,
            timed_out = result.timed_out,
            "Delivery result received"
        );

        Ok(result)
    }

    /// `publish_and_await` with the publisher's configured reply timeout.
    pub async fn dispatch(
        &self,
        request: NotificationRequest,
    ) -> Result<DeliveryResult, DispatchError> {
        self.publish_and_await(request, self.reply_timeout).await
    }

    /// Sends several events concurrently, one outcome per request in order.
    pub async fn fan_out(
        &self,
        requests: Vec<NotificationRequest>,
        timeout: Duration,
    ) -> Vec<Result<DeliveryResult, DispatchError>> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.publish_and_await(request, timeout)),
        )
        .await
    }

    fn prepare(request: NotificationRequest) -> Result<NotificationEvent, DispatchError> {
        request.validate()?;
        Ok(request.into_event(Uuid::new_v4().to_string()))
    }

    fn outbound(&self, event: &NotificationEvent) -> Result<OutboundMessage, DispatchError> {
        let channel = self
            .topology
            .channel(event.channel)
            .ok_or(DispatchError::UnknownChannel(event.channel))?;

        Ok(
            OutboundMessage::new(&channel.exchange, &channel.routing_key, event.encode()?)
                .with_correlation_id(event.correlation_id.clone()),
        )
    }
}

impl Drop for EventPublisher {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Feeds every reply from `source` into `registry` until the source closes.
pub async fn run_reply_listener<S>(
    mut source: S,
    registry: Arc<CorrelationRegistry>,
) -> Result<(), BrokerError>
where
    S: MessageSource,
{
    while let Some(message) = source.next_message().await {
        let message = message?;

        let Some(result) = reply_to_result(message) else {
            continue;
        };

        let correlation_id = result.correlation_id.clone();
        registry.resolve(&correlation_id, result);
    }

    debug!("Reply source closed");

    Ok(())
}

fn reply_to_result(message: InboundMessage) -> Option<DeliveryResult> {
    let Some(correlation_id) = message.correlation_id else {
        warn!(
            delivery_tag = message.delivery_tag,
            "Reply without correlation id ignored"
        );
        return None;
    };

    let result = match DeliveryStatus::decode(&message.payload) {
        Some(DeliveryStatus::Success) => DeliveryResult::success(correlation_id),
        Some(DeliveryStatus::Failed) => DeliveryResult {
            correlation_id,
            status: DeliveryStatus::Failed,
            cause: message.failure_cause,
            timed_out: false,
        },
        None => {
            warn!(
                correlation_id = %correlation_id,
                "Unrecognized reply body treated as failure"
            );
            DeliveryResult::failed(correlation_id, "unrecognized reply")
        }
    };

    Some(result)
}

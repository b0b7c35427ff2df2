use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use notification_dispatcher::{
    broker::TopologyDeclarer,
    clients::memory::InMemoryBroker,
    models::channel::ChannelKind,
    publisher::EventPublisher,
    sender::{ChannelSender, SendError},
    topology::Topology,
    worker::{ChannelWorker, WorkerError},
};
use tokio::task::JoinHandle;

pub const REPLY_QUEUE: &str = "test-reply-queue";

#[derive(Clone)]
pub enum Behaviour {
    Succeed,
    Fail(SendError),
    Panic,
    Delay(Duration),
}

/// Channel sender double recording every call.
pub struct StubSender {
    channel: ChannelKind,
    behaviour: Behaviour,
    configured: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    deliveries: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl StubSender {
    pub fn new(channel: ChannelKind, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self::build(channel, behaviour, true))
    }

    pub fn unconfigured(channel: ChannelKind) -> Arc<Self> {
        Arc::new(Self::build(channel, Behaviour::Succeed, false))
    }

    fn build(channel: ChannelKind, behaviour: Behaviour, configured: bool) -> Self {
        Self {
            channel,
            behaviour,
            configured,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn deliveries(&self) -> Vec<(String, HashMap<String, String>)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for StubSender {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn provider(&self) -> &'static str {
        "stub"
    }

    fn check_configuration(&self) -> Result<(), SendError> {
        if self.configured {
            Ok(())
        } else {
            Err(SendError::Configuration("STUB_API_KEY is not set".to_string()))
        }
    }

    async fn send(
        &self,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.deliveries
            .lock()
            .unwrap()
            .push((recipient.to_string(), template_data.clone()));

        match &self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail(e) => Err(e.clone()),
            Behaviour::Panic => panic!("provider SDK blew up"),
            Behaviour::Delay(delay) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(*delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

/// In-memory broker with the standard topology and a running publisher.
pub struct Harness {
    pub broker: InMemoryBroker,
    pub topology: Topology,
    pub publisher: EventPublisher,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let broker = InMemoryBroker::new();
        let topology = Topology::standard();
        topology.declare(&broker).await?;

        broker.declare_queue(REPLY_QUEUE).await?;
        let replies = broker.consume(REPLY_QUEUE, true).await?;

        let publisher = EventPublisher::start(
            Arc::new(broker.clone()),
            topology.clone(),
            REPLY_QUEUE,
            replies,
            Duration::from_millis(50),
        );

        Ok(Self {
            broker,
            topology,
            publisher,
        })
    }

    pub fn worker(
        &self,
        sender: Arc<StubSender>,
        concurrency: usize,
    ) -> Result<ChannelWorker, WorkerError> {
        let channel = self
            .topology
            .channel(sender.channel())
            .cloned()
            .expect("standard topology covers every channel");

        ChannelWorker::new(
            channel,
            sender,
            Arc::new(self.broker.clone()),
            Arc::new(self.broker.clone()),
            concurrency,
        )
    }

    /// Starts a worker consuming its channel queue in the background.
    pub async fn spawn_worker(
        &self,
        sender: Arc<StubSender>,
        concurrency: usize,
    ) -> Result<JoinHandle<Result<(), WorkerError>>> {
        let worker = self.worker(sender, concurrency)?;
        let source = self
            .broker
            .consume(&worker.topology().queue, false)
            .await
            .map_err(|e| anyhow!(e))?;

        Ok(tokio::spawn(async move { worker.run(source).await }))
    }
}

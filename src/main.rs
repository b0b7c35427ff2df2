use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatcher::{
    api::run_api_server,
    clients::{
        health::{HealthChecker, WorkerStates},
        rbmq::RabbitMqClient,
    },
    config::Config,
    sender::build_sender,
    topology::Topology,
    utils::init_tracing,
    worker::ChannelWorker,
};
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    init_tracing();

    let config = Config::load()?;
    let channels = config.channels()?;
    let topology = Topology::standard();

    // Credentials are checked before touching the broker.
    let mut senders = Vec::with_capacity(channels.len());
    for channel in &channels {
        let sender = build_sender(*channel, &config)
            .map_err(|e| anyhow!("Cannot start {} worker: {}", channel, e))?;
        senders.push(sender);
    }

    let client = Arc::new(RabbitMqClient::connect(&config).await?);
    topology.declare(client.as_ref()).await?;

    let workers = WorkerStates::new();
    let mut tasks = JoinSet::new();

    for sender in senders {
        let channel = sender.channel();
        let provider = sender.provider();
        let channel_topology = topology
            .channel(channel)
            .cloned()
            .ok_or_else(|| anyhow!("No topology for {} channel", channel))?;

        let source = client
            .create_consumer(&channel_topology.queue, &format!("{}_worker", channel))
            .await?;

        let worker = ChannelWorker::new(
            channel_topology,
            sender,
            client.clone(),
            Arc::new(source.acknowledger()),
            config.worker_concurrency,
        )?;

        workers.mark_running(channel, &worker.topology().queue, provider);

        let states = workers.clone();
        tasks.spawn(async move {
            let outcome = worker.run(source).await;
            states.mark_stopped(channel);
            (channel, outcome)
        });
    }

    let health_checker = HealthChecker::new(client.clone(), workers.clone());
    let port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = run_api_server(health_checker, port).await {
            error!(error = %e, "Health check server stopped");
        }
    });

    info!(channels = ?channels, "Notification workers running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
        Some(finished) = tasks.join_next() => {
            let (channel, outcome) = finished?;
            match outcome {
                Ok(()) => Err(anyhow!("{} worker stopped: consumer closed", channel)),
                Err(e) => Err(anyhow!("{} worker stopped: {}", channel, e)),
            }
        }
    }
}

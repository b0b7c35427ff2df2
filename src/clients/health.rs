use std::{collections::BTreeMap, sync::Arc, time::Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    clients::rbmq::RabbitMqClient,
    models::{
        channel::ChannelKind,
        health::{BrokerHealth, HealthReport, HealthStatus, WorkerHealth},
    },
};

/// Reports whether the broker connection is up.
pub trait BrokerProbe: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl BrokerProbe for RabbitMqClient {
    fn is_connected(&self) -> bool {
        RabbitMqClient::is_connected(self)
    }
}

struct WorkerEntry {
    queue: String,
    provider: String,
    running: bool,
}

/// Liveness of the channel workers running in this process.
#[derive(Clone, Default)]
pub struct WorkerStates {
    states: Arc<DashMap<ChannelKind, WorkerEntry>>,
}

impl WorkerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_running(&self, channel: ChannelKind, queue: &str, provider: &str) {
        self.states.insert(
            channel,
            WorkerEntry {
                queue: queue.to_string(),
                provider: provider.to_string(),
                running: true,
            },
        );
    }

    pub fn mark_stopped(&self, channel: ChannelKind) {
        if let Some(mut entry) = self.states.get_mut(&channel) {
            entry.running = false;
        }
    }

    fn snapshot(&self) -> BTreeMap<ChannelKind, WorkerHealth> {
        self.states
            .iter()
            .map(|entry| {
                let status = if entry.running {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                };

                (
                    *entry.key(),
                    WorkerHealth {
                        status,
                        queue: entry.queue.clone(),
                        provider: entry.provider.clone(),
                    },
                )
            })
            .collect()
    }
}

pub struct HealthChecker {
    broker: Arc<dyn BrokerProbe>,
    workers: WorkerStates,
}

impl HealthChecker {
    pub fn new(broker: Arc<dyn BrokerProbe>, workers: WorkerStates) -> Self {
        Self { broker, workers }
    }

    pub fn report(&self) -> HealthReport {
        let broker = self.check_broker();
        let workers = self.workers.snapshot();

        HealthReport {
            status: overall_status(&broker, &workers),
            timestamp: Utc::now(),
            broker,
            workers,
        }
    }

    fn check_broker(&self) -> BrokerHealth {
        let start = Instant::now();

        if self.broker.is_connected() {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(check_time_ms = elapsed, "Broker health check passed");
            BrokerHealth::connected(elapsed)
        } else {
            warn!("Broker connection lost");
            BrokerHealth::disconnected("Connection lost")
        }
    }
}

/// Losing the broker or every worker takes the process out of service; a
/// single stopped worker only degrades it.
pub fn overall_status(
    broker: &BrokerHealth,
    workers: &BTreeMap<ChannelKind, WorkerHealth>,
) -> HealthStatus {
    let stopped = workers
        .values()
        .filter(|worker| worker.status == HealthStatus::Unhealthy)
        .count();

    if broker.status == HealthStatus::Unhealthy || (!workers.is_empty() && stopped == workers.len())
    {
        HealthStatus::Unhealthy
    } else if stopped > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

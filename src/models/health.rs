use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::channel::ChannelKind;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Whether the process should keep receiving traffic.
    pub fn is_serving(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }
}

/// State of the broker connection.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrokerHealth {
    pub fn connected(check_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            check_time_ms: Some(check_time_ms),
            error: None,
        }
    }

    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            check_time_ms: None,
            error: Some(error.into()),
        }
    }
}

/// State of one channel worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    pub status: HealthStatus,
    pub queue: String,
    pub provider: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub broker: BrokerHealth,
    pub workers: BTreeMap<ChannelKind, WorkerHealth>,
}

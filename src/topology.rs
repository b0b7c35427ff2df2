//! Where each channel's traffic lives on the broker.
//!
//! Every channel owns a direct exchange with two bound queues: the work queue
//! its worker consumes, and a status queue collecting results of events that
//! carried no reply address. The names are shared with already deployed
//! services and must not change.

use std::collections::BTreeMap;

use tracing::info;

use crate::{
    broker::{Result, TopologyDeclarer},
    models::channel::ChannelKind,
};

/// Broker resources of a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTopology {
    pub channel: ChannelKind,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub status_queue: String,
    pub status_routing_key: String,
}

impl ChannelTopology {
    pub fn email() -> Self {
        Self {
            channel: ChannelKind::Email,
            exchange: "employee-mail-exchange".to_string(),
            queue: "employee-updates-mail-queue".to_string(),
            routing_key: "employee.mail.update".to_string(),
            status_queue: "email-status-queue".to_string(),
            status_routing_key: "email.status".to_string(),
        }
    }

    pub fn sms() -> Self {
        Self {
            channel: ChannelKind::Sms,
            exchange: "employee-sms-exchange".to_string(),
            queue: "employee-updates-sms-queue".to_string(),
            routing_key: "employee.sms.update".to_string(),
            status_queue: "sms-status-queue".to_string(),
            status_routing_key: "sms.status".to_string(),
        }
    }

    pub fn standard(channel: ChannelKind) -> Self {
        match channel {
            ChannelKind::Email => Self::email(),
            ChannelKind::Sms => Self::sms(),
        }
    }

    pub async fn declare(&self, declarer: &dyn TopologyDeclarer) -> Result<()> {
        declarer.declare_direct_exchange(&self.exchange).await?;

        declarer.declare_queue(&self.queue).await?;
        declarer
            .bind_queue(&self.queue, &self.exchange, &self.routing_key)
            .await?;

        declarer.declare_queue(&self.status_queue).await?;
        declarer
            .bind_queue(&self.status_queue, &self.exchange, &self.status_routing_key)
            .await?;

        info!(
            channel = %self.channel,
            exchange = %self.exchange,
            queue = %self.queue,
            routing_key = %self.routing_key,
            "Channel topology declared"
        );

        Ok(())
    }
}

/// Topology of every known channel.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    channels: BTreeMap<ChannelKind, ChannelTopology>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// The email and SMS channels as deployed today.
    pub fn standard() -> Self {
        ChannelKind::ALL
            .into_iter()
            .map(ChannelTopology::standard)
            .fold(Self::new(), Self::with_channel)
    }

    /// Adds or replaces the descriptor for a channel.
    pub fn with_channel(mut self, channel: ChannelTopology) -> Self {
        self.channels.insert(channel.channel, channel);
        self
    }

    pub fn channel(&self, channel: ChannelKind) -> Option<&ChannelTopology> {
        self.channels.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelTopology> {
        self.channels.values()
    }

    /// Safe to call on every process start.
    pub async fn declare(&self, declarer: &dyn TopologyDeclarer) -> Result<()> {
        for channel in self.channels.values() {
            channel.declare(declarer).await?;
        }

        Ok(())
    }
}

//! Channel sender contract.
//!
//! A sender performs the actual delivery through a third-party provider. The
//! dispatch core only sees this trait; provider clients live in `clients`.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    clients::{smsapi::SmsApiSender, sendgrid::SendGridEmailSender, twilio::TwilioSmsSender},
    config::{Config, SmsProvider},
    models::channel::ChannelKind,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Missing credentials or identity. Stops the worker from starting.
    #[error("Sender misconfigured: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl SendError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SendError::Configuration(_))
    }
}

/// Delivers one notification over one channel.
///
/// Implementations are shared between concurrently processed messages.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> ChannelKind;

    fn provider(&self) -> &'static str;

    /// Checked once before a worker accepts traffic.
    fn check_configuration(&self) -> Result<(), SendError>;

    async fn send(
        &self,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> Result<(), SendError>;
}

/// Builds the configured sender for `channel`.
pub fn build_sender(
    channel: ChannelKind,
    config: &Config,
) -> Result<Arc<dyn ChannelSender>, SendError> {
    let sender: Arc<dyn ChannelSender> = match channel {
        ChannelKind::Email => Arc::new(SendGridEmailSender::new(config.sendgrid_config())?),
        ChannelKind::Sms => match config
            .sms_provider()
            .map_err(|e| SendError::Configuration(e.to_string()))?
        {
            SmsProvider::Twilio => Arc::new(TwilioSmsSender::new(config.twilio_config())?),
            SmsProvider::SmsApi => Arc::new(SmsApiSender::new(config.smsapi_config())?),
        },
    };

    sender.check_configuration()?;

    Ok(sender)
}

/// Returns the value of a required setting, or a configuration error naming it.
pub(crate) fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, SendError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SendError::Configuration(format!("{} is not set", name)))
}

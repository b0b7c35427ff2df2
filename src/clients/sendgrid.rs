use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    config::SendGridConfig,
    models::{
        channel::ChannelKind,
        provider::{SendGridAddress, SendGridMail, SendGridPersonalization},
        validation::validate_recipient,
    },
    sender::{ChannelSender, SendError, required},
};

/// Sends the team change email through a SendGrid dynamic template.
pub struct SendGridEmailSender {
    http_client: Client,
    config: SendGridConfig,
}

impl SendGridEmailSender {
    pub fn new(config: SendGridConfig) -> Result<Self, SendError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "SendGrid email sender initialized");

        Ok(Self {
            http_client,
            config,
        })
    }

    fn build_mail(
        &self,
        sender_email: &str,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> SendGridMail {
        SendGridMail {
            from: SendGridAddress {
                email: sender_email.to_string(),
            },
            personalizations: vec![SendGridPersonalization {
                to: vec![SendGridAddress {
                    email: recipient.to_string(),
                }],
                dynamic_template_data: template_data.clone(),
            }],
            template_id: self.config.template_id.clone(),
        }
    }
}

#[async_trait]
impl ChannelSender for SendGridEmailSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn provider(&self) -> &'static str {
        "sendgrid"
    }

    fn check_configuration(&self) -> Result<(), SendError> {
        required(&self.config.api_key, "SENDGRID_API_KEY")?;
        required(&self.config.sender_email, "SENDER_EMAIL")?;
        Ok(())
    }

    async fn send(
        &self,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> Result<(), SendError> {
        let api_key = required(&self.config.api_key, "SENDGRID_API_KEY")?;
        let sender_email = required(&self.config.sender_email, "SENDER_EMAIL")?;

        validate_recipient(ChannelKind::Email, recipient)
            .map_err(|e| SendError::InvalidRecipient(e.to_string()))?;

        debug!(recipient, "Sending email through SendGrid");

        let mail = self.build_mail(sender_email, recipient, template_data);
        let url = format!("{}/v3/mail/send", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&mail)
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("SendGrid request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            info!(recipient, "Email accepted by SendGrid");
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        warn!(recipient, status = %status, "SendGrid rejected email");

        Err(SendError::Provider(format!(
            "SendGrid returned status {}: {}",
            status, error_text
        )))
    }
}

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{
    config::SmsApiConfig,
    models::{
        channel::ChannelKind,
        provider::SmsApiResponse,
        template::render_team_change_sms,
        validation::validate_recipient,
    },
    sender::{ChannelSender, SendError, required},
};

/// SMSAPI error codes meaning the destination number itself is unusable.
const INVALID_RECIPIENT_CODES: [u32; 2] = [13, 14];

const ACCEPTED_STATUSES: [&str; 4] = ["QUEUE", "ACCEPTED", "SENT", "DELIVERED"];

/// Sends the team change text through SMSAPI.
pub struct SmsApiSender {
    http_client: Client,
    config: SmsApiConfig,
}

impl SmsApiSender {
    pub fn new(config: SmsApiConfig) -> Result<Self, SendError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "SMSAPI sender initialized");

        Ok(Self {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl ChannelSender for SmsApiSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn provider(&self) -> &'static str {
        "smsapi"
    }

    fn check_configuration(&self) -> Result<(), SendError> {
        required(&self.config.oauth_token, "SMSAPI_OAUTH_TOKEN")?;
        Ok(())
    }

    async fn send(
        &self,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> Result<(), SendError> {
        let oauth_token = required(&self.config.oauth_token, "SMSAPI_OAUTH_TOKEN")?;

        validate_recipient(ChannelKind::Sms, recipient)
            .map_err(|e| SendError::InvalidRecipient(e.to_string()))?;

        let body = render_team_change_sms(template_data)
            .map_err(|e| SendError::Provider(e.to_string()))?;

        debug!(recipient, "Sending SMS through SMSAPI");

        let mut form = vec![
            ("to", recipient),
            ("message", body.as_str()),
            ("format", "json"),
            ("encoding", "utf-8"),
        ];
        if let Some(sender_name) = self.config.sender_name.as_deref() {
            form.push(("from", sender_name));
        }

        let url = format!("{}/sms.do", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(oauth_token)
            .form(&form)
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("SMSAPI request failed: {}", e)))?;

        let status = response.status();
        let parsed = response
            .json::<SmsApiResponse>()
            .await
            .map_err(|e| SendError::Provider(format!("SMSAPI returned status {}: {}", status, e)))?;

        match parsed {
            SmsApiResponse::Sent { list } => {
                let Some(message) = list.first() else {
                    return Err(SendError::Provider(
                        "SMSAPI returned an empty response".to_string(),
                    ));
                };

                if ACCEPTED_STATUSES.contains(&message.status.as_str()) {
                    info!(recipient, shipment_id = %message.id, "SMS accepted by SMSAPI");
                    Ok(())
                } else {
                    warn!(recipient, status = %message.status, "SMSAPI did not accept SMS");
                    Err(SendError::Provider(format!(
                        "SMSAPI reported status {}",
                        message.status
                    )))
                }
            }
            SmsApiResponse::Error { error, message } => {
                warn!(recipient, code = error, "SMSAPI rejected SMS");

                if INVALID_RECIPIENT_CODES.contains(&error) {
                    Err(SendError::InvalidRecipient(message))
                } else {
                    Err(SendError::Provider(format!("SMSAPI error {}: {}", error, message)))
                }
            }
        }
    }
}

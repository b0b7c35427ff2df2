use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{
    config::TwilioConfig,
    models::{
        channel::ChannelKind, provider::TwilioError, template::render_team_change_sms,
        validation::validate_recipient,
    },
    sender::{ChannelSender, SendError, required},
};

/// Twilio error codes meaning the destination number itself is unusable.
const INVALID_RECIPIENT_CODES: [u32; 3] = [21211, 21214, 21614];

/// Sends the team change text through a Twilio messaging service.
pub struct TwilioSmsSender {
    http_client: Client,
    config: TwilioConfig,
}

impl TwilioSmsSender {
    pub fn new(config: TwilioConfig) -> Result<Self, SendError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SendError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "Twilio SMS sender initialized");

        Ok(Self {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl ChannelSender for TwilioSmsSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn provider(&self) -> &'static str {
        "twilio"
    }

    fn check_configuration(&self) -> Result<(), SendError> {
        required(&self.config.account_sid, "TWILIO_ACCOUNT_SID")?;
        required(&self.config.auth_token, "TWILIO_AUTH_TOKEN")?;
        required(&self.config.messaging_service_id, "TWILIO_MSG_SERVICE_ID")?;
        Ok(())
    }

    async fn send(
        &self,
        recipient: &str,
        template_data: &HashMap<String, String>,
    ) -> Result<(), SendError> {
        let account_sid = required(&self.config.account_sid, "TWILIO_ACCOUNT_SID")?;
        let auth_token = required(&self.config.auth_token, "TWILIO_AUTH_TOKEN")?;
        let messaging_service_id =
            required(&self.config.messaging_service_id, "TWILIO_MSG_SERVICE_ID")?;

        validate_recipient(ChannelKind::Sms, recipient)
            .map_err(|e| SendError::InvalidRecipient(e.to_string()))?;

        let body = render_team_change_sms(template_data)
            .map_err(|e| SendError::Provider(e.to_string()))?;

        debug!(recipient, "Sending SMS through Twilio");

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            account_sid
        );

        let response = self
            .http_client
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&[
                ("To", recipient),
                ("MessagingServiceSid", messaging_service_id),
                ("Body", body.as_str()),
                ("SmartEncoded", "true"),
            ])
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("Twilio request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            info!(recipient, "SMS accepted by Twilio");
            return Ok(());
        }

        let error = response.json::<TwilioError>().await.ok();
        let code = error.as_ref().and_then(|e| e.code);
        let message = error
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("status {}", status));

        warn!(recipient, status = %status, code, "Twilio rejected SMS");

        match code {
            Some(code) if INVALID_RECIPIENT_CODES.contains(&code) => {
                Err(SendError::InvalidRecipient(message))
            }
            _ => Err(SendError::Provider(format!("Twilio returned {}", message))),
        }
    }
}

use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{channel::ChannelKind, retry::RetryConfig};

pub const DEFAULT_SENDGRID_TEMPLATE_ID: &str = "d-ead48a5831e5448aa420d6b3889b55d8";

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_enabled_channels")]
    pub enabled_channels: String,

    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    pub sendgrid_api_key: Option<String>,
    pub sender_email: Option<String>,
    #[serde(default = "default_sendgrid_template_id")]
    pub sendgrid_template_id: String,
    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,

    #[serde(default = "default_sms_provider")]
    pub sms_provider: String,

    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_msg_service_id: Option<String>,
    #[serde(default = "default_twilio_base_url")]
    pub twilio_base_url: String,

    pub smsapi_oauth_token: Option<String>,
    pub smsapi_sender_name: Option<String>,
    #[serde(default = "default_smsapi_base_url")]
    pub smsapi_base_url: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmsProvider {
    Twilio,
    SmsApi,
}

#[derive(Clone, Debug)]
pub struct SendGridConfig {
    pub api_key: Option<String>,
    pub sender_email: Option<String>,
    pub template_id: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub messaging_service_id: Option<String>,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct SmsApiConfig {
    pub oauth_token: Option<String>,
    pub sender_name: Option<String>,
    pub base_url: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    /// Builds a configuration from explicit `NAME=value` pairs instead of the
    /// process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter::<_, Self>(vars.into_iter().map(|(k, v)| (k.into(), v.into())))
            .map_err(|e| anyhow!("Invalid configuration: {}", e))
    }

    /// Channels this process runs workers for.
    pub fn channels(&self) -> Result<Vec<ChannelKind>, Error> {
        let mut channels = self
            .enabled_channels
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(|name| name.parse::<ChannelKind>().map_err(|e| anyhow!(e)))
            .collect::<Result<Vec<_>, _>>()?;

        channels.sort();
        channels.dedup();

        if channels.is_empty() {
            return Err(anyhow!("ENABLED_CHANNELS names no channel"));
        }

        Ok(channels)
    }

    pub fn sms_provider(&self) -> Result<SmsProvider, Error> {
        match self.sms_provider.trim().to_ascii_lowercase().as_str() {
            "twilio" => Ok(SmsProvider::Twilio),
            "smsapi" => Ok(SmsProvider::SmsApi),
            other => Err(anyhow!("Unknown SMS_PROVIDER '{}'", other)),
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn sendgrid_config(&self) -> SendGridConfig {
        SendGridConfig {
            api_key: self.sendgrid_api_key.clone(),
            sender_email: self.sender_email.clone(),
            template_id: self.sendgrid_template_id.clone(),
            base_url: self.sendgrid_base_url.clone(),
        }
    }

    pub fn twilio_config(&self) -> TwilioConfig {
        TwilioConfig {
            account_sid: self.twilio_account_sid.clone(),
            auth_token: self.twilio_auth_token.clone(),
            messaging_service_id: self.twilio_msg_service_id.clone(),
            base_url: self.twilio_base_url.clone(),
        }
    }

    pub fn smsapi_config(&self) -> SmsApiConfig {
        SmsApiConfig {
            oauth_token: self.smsapi_oauth_token.clone(),
            sender_name: self.smsapi_sender_name.clone(),
            base_url: self.smsapi_base_url.clone(),
        }
    }
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_enabled_channels() -> String {
    "email,sms".to_string()
}

fn default_reply_timeout_ms() -> u64 {
    10_000
}

fn default_reaper_interval_ms() -> u64 {
    1_000
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_sendgrid_template_id() -> String {
    DEFAULT_SENDGRID_TEMPLATE_ID.to_string()
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_sms_provider() -> String {
    "smsapi".to_string()
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_smsapi_base_url() -> String {
    "https://api.smsapi.pl".to_string()
}

fn default_server_port() -> u16 {
    8080
}

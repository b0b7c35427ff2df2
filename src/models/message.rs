use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{
    channel::ChannelKind,
    validation::{ValidationError, validate_recipient},
};

pub const FIRST_NAME_KEY: &str = "firstName";
pub const NEW_TEAM_KEY: &str = "newTeam";

pub const EMPLOYEE_NAME_VAR: &str = "employee_name";
pub const TEAM_NAME_VAR: &str = "team_name";

/// Flat wire payload of a notification event.
pub type EventPayload = BTreeMap<String, String>;

/// What a caller asks to have delivered, before a correlation id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channel: ChannelKind,
    pub recipient: String,
    pub employee_name: String,
    pub team_name: String,
}

impl NotificationRequest {
    pub fn new(
        channel: ChannelKind,
        recipient: impl Into<String>,
        employee_name: impl Into<String>,
        team_name: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            recipient: recipient.into(),
            employee_name: employee_name.into(),
            team_name: team_name.into(),
        }
    }

    pub fn email(
        recipient: impl Into<String>,
        employee_name: impl Into<String>,
        team_name: impl Into<String>,
    ) -> Self {
        Self::new(ChannelKind::Email, recipient, employee_name, team_name)
    }

    pub fn sms(
        recipient: impl Into<String>,
        employee_name: impl Into<String>,
        team_name: impl Into<String>,
    ) -> Self {
        Self::new(ChannelKind::Sms, recipient, employee_name, team_name)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_recipient(self.channel, &self.recipient)
    }

    pub fn into_event(self, correlation_id: impl Into<String>) -> NotificationEvent {
        NotificationEvent {
            correlation_id: correlation_id.into(),
            channel: self.channel,
            recipient: self.recipient.trim().to_string(),
            employee_name: self.employee_name,
            team_name: self.team_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing '{0}' in payload")]
    MissingField(&'static str),
}

/// An employee change on its way to a channel worker.
///
/// The correlation id travels in the broker's correlation metadata, never in
/// the payload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub correlation_id: String,
    pub channel: ChannelKind,
    pub recipient: String,
    pub employee_name: String,
    pub team_name: String,
}

impl NotificationEvent {
    pub fn to_payload(&self) -> EventPayload {
        let mut payload = EventPayload::new();
        payload.insert(
            self.channel.recipient_key().to_string(),
            self.recipient.clone(),
        );
        payload.insert(FIRST_NAME_KEY.to_string(), self.employee_name.clone());
        payload.insert(NEW_TEAM_KEY.to_string(), self.team_name.clone());
        payload
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_payload())
    }

    /// Decodes a payload consumed from `channel`'s queue.
    ///
    /// Only the recipient is required; names default to empty.
    pub fn decode(
        channel: ChannelKind,
        correlation_id: impl Into<String>,
        body: &[u8],
    ) -> Result<Self, PayloadError> {
        let mut payload: HashMap<String, Option<String>> = serde_json::from_slice(body)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;

        let mut take = |key: &str| payload.remove(key).flatten().unwrap_or_default();

        let recipient = take(channel.recipient_key());
        if recipient.trim().is_empty() {
            return Err(PayloadError::MissingField(channel.recipient_key()));
        }

        Ok(Self {
            correlation_id: correlation_id.into(),
            channel,
            recipient: recipient.trim().to_string(),
            employee_name: take(FIRST_NAME_KEY),
            team_name: take(NEW_TEAM_KEY),
        })
    }

    /// Named values handed to the channel sender.
    pub fn template_data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();

        if !self.employee_name.is_empty() {
            data.insert(EMPLOYEE_NAME_VAR.to_string(), self.employee_name.clone());
        }
        if !self.team_name.is_empty() {
            data.insert(TEAM_NAME_VAR.to_string(), self.team_name.clone());
        }

        data
    }
}

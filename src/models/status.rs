use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

/// Cause attached to results synthesized when no reply arrived in time.
pub const TIMEOUT_CAUSE: &str = "timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "SUCCESS",
            DeliveryStatus::Failed => "FAILED",
        }
    }

    /// Reply body on the wire: a JSON string literal.
    pub fn encode(&self) -> Vec<u8> {
        format!("\"{}\"", self.as_str()).into_bytes()
    }

    /// Accepts both the JSON string literal and the bare word.
    pub fn decode(body: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(body).ok()?.trim();
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(text);

        match text {
            "SUCCESS" => Some(DeliveryStatus::Success),
            "FAILED" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Outcome of one notification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub correlation_id: String,
    pub status: DeliveryStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// Set only when the caller gave up waiting; a worker never sets it.
    #[serde(default)]
    pub timed_out: bool,
}

impl DeliveryResult {
    pub fn success(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: DeliveryStatus::Success,
            cause: None,
            timed_out: false,
        }
    }

    pub fn failed(correlation_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: DeliveryStatus::Failed,
            cause: Some(cause.into()),
            timed_out: false,
        }
    }

    pub fn timeout(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: DeliveryStatus::Failed,
            cause: Some(TIMEOUT_CAUSE.to_string()),
            timed_out: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

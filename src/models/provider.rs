use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridAddress {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridPersonalization {
    pub to: Vec<SendGridAddress>,
    pub dynamic_template_data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridMail {
    pub from: SendGridAddress,
    pub personalizations: Vec<SendGridPersonalization>,
    pub template_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioError {
    pub code: Option<u32>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsApiMessage {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SmsApiResponse {
    Sent { list: Vec<SmsApiMessage> },
    Error { error: u32, message: String },
}

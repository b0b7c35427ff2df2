use crate::models::channel::ChannelKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Recipient for {0} channel cannot be empty")]
    MissingRecipient(ChannelKind),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),
}

pub fn validate_recipient(channel: ChannelKind, recipient: &str) -> Result<(), ValidationError> {
    let recipient = recipient.trim();

    if recipient.is_empty() {
        return Err(ValidationError::MissingRecipient(channel));
    }

    match channel {
        ChannelKind::Email => validate_email(recipient),
        ChannelKind::Sms => validate_phone(recipient),
    }
}

fn validate_email(address: &str) -> Result<(), ValidationError> {
    let Some((local, domain)) = address.split_once('@') else {
        return Err(ValidationError::InvalidEmail(address.to_string()));
    };

    let well_formed = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace);

    if !well_formed {
        return Err(ValidationError::InvalidEmail(address.to_string()));
    }

    Ok(())
}

fn validate_phone(number: &str) -> Result<(), ValidationError> {
    let body = number.strip_prefix('+').unwrap_or(number);

    let valid_chars = body
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-');

    if !valid_chars {
        return Err(ValidationError::InvalidPhone(number.to_string()));
    }

    let digits = body.chars().filter(char::is_ascii_digit).count();
    if !(6..=15).contains(&digits) {
        return Err(ValidationError::InvalidPhone(number.to_string()));
    }

    Ok(())
}

pub mod channel;
pub mod health;
pub mod message;
pub mod provider;
pub mod retry;
pub mod status;
pub mod template;
pub mod validation;

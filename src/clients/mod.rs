pub mod health;
pub mod memory;
pub mod rbmq;
pub mod sendgrid;
pub mod smsapi;
pub mod twilio;

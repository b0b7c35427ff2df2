pub mod api;
pub mod broker;
pub mod clients;
pub mod config;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod sender;
pub mod topology;
pub mod utils;
pub mod worker;

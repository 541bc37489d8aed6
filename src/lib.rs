pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod provider;
pub mod relay;
pub mod router;

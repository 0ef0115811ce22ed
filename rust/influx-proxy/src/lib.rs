pub mod backend;
pub mod config;
pub mod error;
pub mod query;
pub mod response;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod vitals;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the proxy using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config)?.run().await
}

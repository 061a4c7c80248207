use std::time::Duration;

use common::TransferConfig;
use common::chunk::DEFAULT_CHUNK_SIZE;
use common::config::DEFAULT_CONCURRENCY;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Base URL of the upload server. Default: "http://127.0.0.1:3000".
    pub server_url: String,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
}

impl ServerSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub client: ServerSection,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CHUNKUP_CONFIG").unwrap_or_else(|_| "config/client".to_string());

        let s = Config::builder()
            .set_default("client.server_url", "http://127.0.0.1:3000")?
            .set_default("client.timeout_secs", 60)?
            .set_default("transfer.chunk_size", DEFAULT_CHUNK_SIZE)?
            .set_default("transfer.concurrency", DEFAULT_CONCURRENCY as u64)?
            // Load from config/client.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., CHUNKUP__TRANSFER__CONCURRENCY)
            .add_source(Environment::with_prefix("CHUNKUP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

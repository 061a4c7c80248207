use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Largest chunk accepted unless configured otherwise.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    /// Allowed origins. Empty allows any origin.
    pub allow_origins: Vec<String>,
    pub max_age: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
}

/// Chunk storage configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding `chunks/` and `merged/`. Default: "./uploads".
    pub root: PathBuf,
    /// Largest accepted chunk in bytes. Default: 64 MiB.
    pub max_chunk_size: u64,
    /// Check the merged artifact against its fingerprint. Default: true.
    pub verify_merged: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CHUNKUP_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.cors.allow_origins", Vec::<String>::new())?
            .set_default("server.cors.max_age", 3600)?
            .set_default("storage.root", "./uploads")?
            .set_default("storage.max_chunk_size", DEFAULT_MAX_CHUNK_SIZE)?
            .set_default("storage.verify_merged", true)?
            // Load from config/config.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., CHUNKUP__STORAGE__ROOT)
            .add_source(Environment::with_prefix("CHUNKUP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

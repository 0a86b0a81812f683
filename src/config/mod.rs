//! Configuration management for the gateway.
//!
//! This module handles loading the application configuration
//! from a TOML file and environment variable overrides.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from a file (if present) and the environment
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default())
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 4000)?
        .set_default("origin.url", "http://127.0.0.1:5000")?
        .set_default("origin.forward_timeout_secs", 2)?
        .set_default("origin.probe_timeout_secs", 1)?
        .set_default("reputation.path", "ip_memory.json")?
        .set_default("reputation.write_timeout_secs", 1)?
        .set_default("tracker.max_sources", 10_000)?
        .set_default("mitigation.max_signatures", 1_000)?
        .build()?;

    config.try_deserialize()
}

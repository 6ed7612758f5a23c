//! Configuration module for the live-reload server.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`localreload.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LOCALRELOAD_` and use double
//! underscores to separate nested levels:
//! - `LOCALRELOAD_SERVER__PORT=45000` sets `server.port`
//! - `LOCALRELOAD_WATCH__DEBOUNCE_MS=500` sets `watch.debounce_ms`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::project::Project;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "localreload.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Filesystem watch settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Projects enabled at startup
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Port for the event-stream listener. Port 0 binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Quiet window after the last filesystem event before a reload fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Per-connection signal buffer; a subscriber over capacity loses pulses
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_port() -> u16 {
    35730
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_client_buffer() -> usize {
    10
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
            projects: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            client_buffer: default_client_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Layer in environment variables with LOCALRELOAD_ prefix.
            // Double underscore separates nested levels; single underscores
            // remain as is within field names.
            .merge(
                Env::prefixed("LOCALRELOAD_")
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }
}

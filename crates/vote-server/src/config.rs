//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file exists, deep-merge its values over the defaults
//! 3. Apply `VOTEHUB_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use vote_store::StoreConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the voting server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound messages queued per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Clients silent for this long are disconnected.
    pub client_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How often expired votings are swept, in seconds.
    pub sweep_interval_secs: u64,
    /// Static page served at `/`.
    pub index_path: PathBuf,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            max_message_size: 64 * 1024,
            sweep_interval_secs: 60,
            index_path: PathBuf::from("static/index.html"),
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Load config from an optional file path, then apply env var overrides.
///
/// A missing file yields defaults; unreadable or invalid JSON is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `VOTEHUB_*` environment variables. Invalid values are ignored.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
pub fn apply_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("VOTEHUB_HOST").and_then(|v| parse_non_empty(&v)) {
        config.host = v;
    }
    if let Some(v) = lookup("VOTEHUB_PORT").and_then(|v| parse_u64_in(&v, 0, 65535)) {
        config.port = v as u16;
    }
    if let Some(v) = lookup("VOTEHUB_MAX_SEND_QUEUE").and_then(|v| parse_u64_in(&v, 1, 65_536)) {
        config.max_send_queue = v as usize;
    }
    if let Some(v) = lookup("VOTEHUB_STORE_TTL_SECS").and_then(|v| parse_u64_in(&v, 0, u64::MAX)) {
        config.store.ttl_secs = v;
    }
    if let Some(v) = lookup("VOTEHUB_STORE_CAPACITY").and_then(|v| parse_u64_in(&v, 0, 10_000_000)) {
        config.store.capacity = v as usize;
    }
    if let Some(v) = lookup("VOTEHUB_SWEEP_INTERVAL_SECS").and_then(|v| parse_u64_in(&v, 1, 86_400)) {
        config.sweep_interval_secs = v;
    }
    if let Some(v) = lookup("VOTEHUB_INDEX_PATH").and_then(|v| parse_non_empty(&v)) {
        config.index_path = PathBuf::from(v);
    }
}

/// Parse an unsigned integer within `[min, max]`.
pub fn parse_u64_in(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

/// Trimmed value, or `None` if blank.
pub fn parse_non_empty(val: &str) -> Option<String> {
    let trimmed = val.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

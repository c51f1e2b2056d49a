//! Demo server configuration loading.
//!
//! TOML is the sole config source; every field has a default so an absent
//! file just yields the stock configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use wirecall::ServerConfig;

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    listen: Option<String>,
    max_sessions: Option<usize>,
    mgr_tick_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
    max_recv_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load server config from a TOML file.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load server config from a TOML string, applying defaults for anything
/// left unset.
pub fn load_config_from_str(toml_str: &str) -> Result<ServerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = ServerConfig::default();

    let listen_endpoint = match raw.listen {
        Some(s) => s
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidValue(format!("listen: '{}'", s)))?,
        None => defaults.listen_endpoint,
    };

    Ok(ServerConfig {
        listen_endpoint,
        max_session_num: raw.max_sessions.unwrap_or(defaults.max_session_num),
        mgr_timer_dt: raw
            .mgr_tick_secs
            .map_or(defaults.mgr_timer_dt, Duration::from_secs),
        max_no_data_duration: raw
            .idle_timeout_secs
            .map_or(defaults.max_no_data_duration, Duration::from_secs),
        max_recv_size: raw.max_recv_size.unwrap_or(defaults.max_recv_size),
    })
}

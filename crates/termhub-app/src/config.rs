//! Settings resolution: built-in defaults < TOML file < environment and flags

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use termhub_connection::{ConnectionMode, ConnectionOptions};
use termhub_types::{
    DEFAULT_MAX_SESSIONS, DEFAULT_TERMINAL_ENDPOINT, DEFAULT_WS_PREFIX, RESIZE_DEBOUNCE_MS,
    TERMINAL_RECONNECT_INTERVAL_MS, TERMINAL_RECONNECT_LIMIT,
};

use crate::cli::{AttachArgs, ServeArgs};

/// Config file picked up from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "termhub.toml";

pub const DEFAULT_HOST: &str = "127.0.0.1:8000";
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
}

// ============================================================================
// File layer
// ============================================================================

/// Contents of `termhub.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub client: ClientFileConfig,
    pub server: ServerFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientFileConfig {
    pub host: Option<String>,
    pub secure: Option<bool>,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub reconnect_limit: Option<u32>,
    pub reconnect_interval_ms: Option<u64>,
    pub manual: Option<bool>,
    pub max_sessions: Option<usize>,
    pub resize_debounce_ms: Option<u64>,
    pub storage_path: Option<PathBuf>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerFileConfig {
    pub bind: Option<String>,
    pub shell: Option<String>,
    pub prefix: Option<String>,
    pub token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load an explicit file, or `termhub.toml` in `dir` if one exists
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            log::debug!("Using config file {}", candidate.display());
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub host: String,
    pub secure: bool,
    pub prefix: String,
    pub endpoint: String,
    pub reconnect_limit: u32,
    pub reconnect_interval: Duration,
    pub manual: bool,
    pub max_sessions: usize,
    pub resize_debounce: Duration,
    pub storage_path: Option<PathBuf>,
    pub token: Option<String>,
    pub mode: ConnectionMode,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: false,
            prefix: DEFAULT_WS_PREFIX.to_string(),
            endpoint: DEFAULT_TERMINAL_ENDPOINT.to_string(),
            reconnect_limit: TERMINAL_RECONNECT_LIMIT,
            reconnect_interval: Duration::from_millis(TERMINAL_RECONNECT_INTERVAL_MS),
            manual: true,
            max_sessions: DEFAULT_MAX_SESSIONS,
            resize_debounce: Duration::from_millis(RESIZE_DEBOUNCE_MS),
            storage_path: None,
            token: None,
            mode: ConnectionMode::Terminal,
        }
    }
}

impl ClientSettings {
    pub fn resolve(file: ClientFileConfig, args: &AttachArgs) -> Self {
        let defaults = Self::default();
        Self {
            host: args.host.clone().or(file.host).unwrap_or(defaults.host),
            secure: args.secure || file.secure.unwrap_or(defaults.secure),
            prefix: args.prefix.clone().or(file.prefix).unwrap_or(defaults.prefix),
            endpoint: args
                .endpoint
                .clone()
                .or(file.endpoint)
                .unwrap_or(defaults.endpoint),
            reconnect_limit: args
                .reconnect_limit
                .or(file.reconnect_limit)
                .unwrap_or(defaults.reconnect_limit),
            reconnect_interval: args
                .reconnect_interval_ms
                .or(file.reconnect_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_interval),
            manual: if args.auto_connect {
                false
            } else {
                file.manual.unwrap_or(defaults.manual)
            },
            max_sessions: args
                .max_sessions
                .or(file.max_sessions)
                .unwrap_or(defaults.max_sessions),
            resize_debounce: args
                .resize_debounce_ms
                .or(file.resize_debounce_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.resize_debounce),
            storage_path: args.storage.clone().or(file.storage_path),
            token: args.token.clone().or(file.token),
            mode: if args.channel {
                ConnectionMode::Channel
            } else {
                defaults.mode
            },
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            reconnect_limit: self.reconnect_limit,
            reconnect_interval: self.reconnect_interval,
            manual: self.manual,
            mode: self.mode,
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub shell: String,
    pub prefix: String,
    pub token: Option<String>,
}

impl ServerSettings {
    pub fn resolve(file: ServerFileConfig, args: &ServeArgs) -> Result<Self, ConfigError> {
        let bind = args
            .bind
            .clone()
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;
        Ok(Self {
            bind,
            shell: args
                .shell
                .clone()
                .or(file.shell)
                .unwrap_or_else(default_shell),
            prefix: args
                .prefix
                .clone()
                .or(file.prefix)
                .unwrap_or_else(|| DEFAULT_WS_PREFIX.to_string()),
            token: args.token.clone().or(file.token),
        })
    }
}

/// `$SHELL`, falling back to `/bin/sh`
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

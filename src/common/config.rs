//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Worker process settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Control channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Step debugger settings
    #[serde(default)]
    pub debugger: DebuggerConfig,
}

/// Configuration for the test worker process
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerConfig {
    /// Path to the worker executable (searched in PATH when relative)
    pub path: Option<PathBuf>,

    /// Arguments passed to the worker before any flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Runtime flags forwarded to the worker, e.g. `--inspect-brk=9230`
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Time the worker has to connect back after being spawned
    #[serde(default = "default_handshake")]
    pub handshake_secs: u64,

    /// Time the worker has to exit after an `exit` request
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake(),
            stop_grace_ms: default_stop_grace(),
        }
    }
}

fn default_handshake() -> u64 {
    10
}
fn default_stop_grace() -> u64 {
    2000
}

/// Control channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Largest accepted message body
    #[serde(default = "default_max_message")]
    pub max_message_mb: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_mb: default_max_message(),
        }
    }
}

impl ChannelConfig {
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_message() -> usize {
    100
}

/// Step debugger configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggerConfig {
    /// Attach a debugger even when no inspect flag was given
    #[serde(default)]
    pub enabled: bool,

    /// Host of the worker's debug endpoint
    #[serde(default = "default_debug_host")]
    pub host: String,

    /// Port of the worker's debug endpoint (0 picks a free port)
    #[serde(default)]
    pub port: u16,

    /// Source path prefixes that belong to the orchestrator rather than user
    /// tests; pauses inside them are stepped out of
    #[serde(default)]
    pub internal_paths: Vec<String>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_debug_host(),
            port: 0,
            internal_paths: Vec::new(),
        }
    }
}

fn default_debug_host() -> String {
    "127.0.0.1".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the worker executable
    ///
    /// Explicit paths win; bare names are searched in PATH.
    pub fn worker_executable(&self) -> Result<PathBuf> {
        let path = self
            .worker
            .path
            .as_ref()
            .ok_or(super::Error::WorkerNotFound)?;

        if path.components().count() > 1 || path.is_absolute() {
            return Ok(path.clone());
        }

        which::which(path).map_err(|_| super::Error::WorkerNotFound)
    }
}

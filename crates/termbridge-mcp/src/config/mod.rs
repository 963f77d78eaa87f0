//! Configuration loading and resolution.
//!
//! Precedence, lowest to highest: built-in defaults, the JSON config file,
//! `TERMBRIDGE_*` environment variables, command-line flags (applied by `main`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use termbridge::transfer::{DEFAULT_MAX_TRANSFER_BYTES, DEFAULT_RETENTION};
use termbridge::{Profile, TransferConfig};

use crate::types::{McpError, McpResult};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
    pub max_upload_bytes: u64,
    pub max_download_bytes: u64,
    pub transfer_retention: usize,
    /// Directory served as the remote side of transfers. Defaults to `$HOME`.
    pub fs_root: Option<PathBuf>,
    /// Shell started as the default terminal. Defaults to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    pub profiles: Vec<Profile>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            max_upload_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            max_download_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            transfer_retention: DEFAULT_RETENTION,
            fs_root: None,
            shell: None,
            profiles: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            max_upload_bytes: self.max_upload_bytes,
            max_download_bytes: self.max_download_bytes,
            retention: self.transfer_retention,
            ..TransferConfig::default()
        }
    }

    pub fn resolve_fs_root(&self) -> PathBuf {
        if let Some(root) = &self.fs_root {
            return root.clone();
        }
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
    }

    pub fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    fn apply_env(&mut self) -> McpResult<()> {
        if let Ok(host) = std::env::var("TERMBRIDGE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("TERMBRIDGE_PORT") {
            self.port = port
                .parse()
                .map_err(|_| McpError::Startup(format!("Invalid TERMBRIDGE_PORT: {port}")))?;
        }
        Ok(())
    }
}

/// Resolve the config file path: explicit flag, then `TERMBRIDGE_CONFIG`, then
/// `./.termbridge/config.json` when it exists.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var("TERMBRIDGE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(".termbridge/config.json");
    cwd_config.exists().then_some(cwd_config)
}

/// Load the config file (if any) and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> McpResult<ServerConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> McpResult<ServerConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        McpError::Startup(format!("Cannot read config {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| McpError::Startup(format!("Invalid config {}: {e}", path.display())))
}

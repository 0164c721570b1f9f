//! spy config
//!
//! Loaded from YAML, then overlaid with `GCSPY_*` environment variables.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::SpyError;
use crate::error::SpyResult;

pub const ENV_ENABLED: &str = "GCSPY_ENABLED";
pub const ENV_PORT: &str = "GCSPY_PORT";
pub const ENV_BIND_ADDRESS: &str = "GCSPY_BIND_ADDRESS";
pub const ENV_WAIT: &str = "GCSPY_WAIT";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpyConfig {
    /// report to a consumer; when false every report is a no-op
    pub enabled: bool,
    pub server_name: String,
    pub bind_address: String,
    /// 0 lets the OS pick a port
    pub port: u16,
    /// block `start` until a client attaches
    pub wait_for_client: bool,
    pub general_info: String,
    pub max_frame_len: usize,
    pub verbose: bool,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_name: "gcspy".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            wait_for_client: false,
            general_info: String::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            verbose: false,
        }
    }
}

impl SpyConfig {
    pub fn from_yaml_str(yaml: &str) -> SpyResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> SpyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!("loading gcspy config from {}", path.display());
        Self::from_yaml_str(&contents)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(self) -> SpyResult<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, which maps a variable name to its value.
    pub fn apply_env_with<F>(mut self, lookup: F) -> SpyResult<Self>
    where F: Fn(&str) -> Option<String> {
        if let Some(enabled) = lookup(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &enabled)?;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .trim()
                .parse()
                .map_err(|e| SpyError::config(format!("{ENV_PORT}={port}: {e}")))?;
        }
        if let Some(address) = lookup(ENV_BIND_ADDRESS) {
            self.bind_address = address;
        }
        if let Some(wait) = lookup(ENV_WAIT) {
            self.wait_for_client = parse_bool(ENV_WAIT, &wait)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_wait_for_client(mut self, wait: bool) -> Self {
        self.wait_for_client = wait;
        self
    }

    pub fn with_general_info(mut self, info: impl Into<String>) -> Self {
        self.general_info = info.into();
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn validate(&self) -> SpyResult<()> {
        if self.server_name.is_empty() {
            return Err(SpyError::config("server name must not be empty"));
        }
        if self.max_frame_len < 64 {
            return Err(SpyError::config(format!(
                "max frame length {} is too small",
                self.max_frame_len
            )));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> SpyResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                SpyError::config(format!(
                    "bind address {}:{}: {e}",
                    self.bind_address, self.port
                ))
            })
    }
}

fn parse_bool(key: &str, value: &str) -> SpyResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SpyError::config(format!("{key}={other} is not a boolean"))),
    }
}

//! Client configuration.
//!
//! Everything has a default, so a config file only needs the keys it
//! changes:
//!
//! ```yaml
//! host: panda.example.org
//! timeout_secs: 5
//! ```

use std::path::Path;
use std::time::Duration;

use pandablocks_protocol::DEFAULT_CONTROL_PORT;
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;

/// Where and how to connect to the control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hostname or address of the device.
    #[serde(default = "default_host")]
    pub host: String,

    /// Control port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long to wait for a connection or a batch of replies.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level used by the command line tool.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> ClientResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Server and client configuration.
//
// Both configs deserialize from JSON with `#[serde(default)]`, so a config
// file only needs the fields it changes. The relay binary layers CLI flags on
// top of the file (see `main.rs`).

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// Whether clients reach the server over TCP or in-process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Mode {
    #[default]
    Networked,
    /// One in-process client, permanently bound to the built-in administrator.
    /// No control socket; login, logout, and downloads are unavailable.
    Embedded,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: IpAddr,
    /// Port 0 lets the OS pick (tests use this).
    pub rpc_port: u16,
    pub control_port: u16,
    pub user_file: Option<PathBuf>,
    pub liveness_interval_ms: u64,
    /// Auto-bind unauthenticated sessions whose peer address equals the
    /// server's bind address to `localhost_admin`. This trusts every process
    /// on the host; leave it off unless the host is single-user.
    pub trust_same_host: bool,
    pub mode: Mode,
    pub scenario: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            rpc_port: 2017,
            control_port: 2020,
            user_file: None,
            liveness_interval_ms: 2000,
            trust_same_host: false,
            mode: Mode::Networked,
            scenario: None,
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub rpc_port: u16,
    pub control_port: u16,
    /// Downloaded trajectory files land here, under their bare file names.
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            rpc_port: 2017,
            control_port: 2020,
            download_dir: PathBuf::from("."),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

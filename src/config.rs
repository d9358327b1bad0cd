//! Server configuration
//!
//! Loaded from an optional TOML file; every field has a sensible LAN default.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, MIX_INTERVAL_MS};
use crate::error::{Error, Result};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control (TCP) listener binds to
    pub bind_address: IpAddr,
    /// Control channel port
    pub tcp_port: u16,
    /// Media channel (UDP) port
    pub udp_port: u16,
    /// Directory uploaded blobs are stored in
    pub files_dir: PathBuf,
    /// Mixing cadence in milliseconds
    pub mix_interval_ms: u64,
    /// UDP receive buffer size in bytes
    pub udp_recv_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            files_dir: PathBuf::from("server_files"),
            mix_interval_ms: MIX_INTERVAL_MS,
            udp_recv_buffer: 1 << 20,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        if config.mix_interval_ms == 0 {
            return Err(Error::Config(format!(
                "mix_interval_ms must be at least 1 in {}",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Socket address of the control listener
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.tcp_port)
    }

    /// Socket address of the media listener
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.udp_port)
    }
}

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::session::TransferOptions;
use crate::tftp::core::Mode;

/// Well-known TFTP request port
pub const DEFAULT_PORT: u16 = 69;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u8 = 5;

/// TFTP client configuration
///
/// # Example
///
/// ```rust
/// use tftpc::tftp::client::ClientConfig;
/// use tftpc::tftp::core::Mode;
///
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69).with_mode(Mode::NetAscii);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server IP address
    pub server_ip: IpAddr,
    /// Server request port (usually 69)
    pub server_port: u16,
    /// Time to wait for each reply
    pub timeout: Duration,
    /// Retransmissions of one packet before the transfer is abandoned
    pub max_retries: u8,
    /// Transfer mode
    pub mode: Mode,
}

impl ClientConfig {
    /// Create new client configuration
    ///
    /// # Arguments
    ///
    /// * `server_ip` - Server IP address
    /// * `server_port` - Server port number (usually 69)
    pub fn new(server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            server_ip,
            server_port,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            mode: Mode::Octet,
        }
    }

    /// Set timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retransmission budget
    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set transfer mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Apply values from a configuration file
    pub fn merge_file(mut self, file: &FileConfig) -> Self {
        if let Some(port) = file.port {
            self.server_port = port;
        }
        if let Some(timeout) = file.timeout {
            self.timeout = timeout;
        }
        if let Some(retries) = file.max_retries {
            self.max_retries = retries;
        }
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        self
    }

    /// Apply command line overrides; `None` keeps the current value
    pub fn merge_cli(
        mut self,
        port: Option<u16>,
        timeout: Option<Duration>,
        max_retries: Option<u8>,
        mode: Option<Mode>,
    ) -> Self {
        self.server_port = port.unwrap_or(self.server_port);
        self.timeout = timeout.unwrap_or(self.timeout);
        self.max_retries = max_retries.unwrap_or(self.max_retries);
        self.mode = mode.unwrap_or(self.mode);
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.server_port)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            mode: self.mode,
            timeout: self.timeout,
            max_retries: self.max_retries,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT)
    }
}

/// Settings read from a TOML configuration file
///
/// ```toml
/// server = "192.168.1.100"
/// port = 69
/// timeout = "3s"
/// max_retries = 8
/// mode = "netascii"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Server host name or address
    pub server: Option<String>,
    pub port: Option<u16>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub max_retries: Option<u8>,
    pub mode: Option<Mode>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

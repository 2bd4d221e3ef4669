use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;

use super::config::ClientConfig;
use super::error::TransferError;
use super::session::TransferSession;

/// TFTP client
///
/// Supports file upload (PUT) and download (GET) operations
///
/// # Example
///
/// ```rust,no_run
/// use tftpc::tftp::client::{Client, ClientConfig};
/// use std::path::Path;
///
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69);
/// let client = Client::new(config);
///
/// // Download file
/// client.get("remote.txt", Path::new("local.txt")).unwrap();
///
/// // Upload file
/// client.put(Path::new("local.txt"), "remote.txt").unwrap();
/// ```
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a new TFTP client
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Download a file from the server (RRQ - Read Request)
    ///
    /// A partially written local file is removed if the transfer fails.
    ///
    /// # Arguments
    ///
    /// * `remote_file` - File name on the server
    /// * `local_file` - Local save path
    pub fn get(&self, remote_file: &str, local_file: &Path) -> Result<u64, TransferError> {
        log::info!("Downloading {} to {}", remote_file, local_file.display());

        let file = File::create(local_file)?;
        let result = self.download(remote_file, BufWriter::new(file));

        match &result {
            Ok(bytes) => log::info!("Download complete: {} ({} bytes)", local_file.display(), bytes),
            Err(_) => {
                if let Err(e) = fs::remove_file(local_file) {
                    log::warn!("Failed to remove {}: {}", local_file.display(), e);
                }
            }
        }
        result
    }

    /// Upload a file to the server (WRQ - Write Request)
    ///
    /// # Arguments
    ///
    /// * `local_file` - Local file path
    /// * `remote_file` - File name on the server
    pub fn put(&self, local_file: &Path, remote_file: &str) -> Result<u64, TransferError> {
        log::info!("Uploading {} to {}", local_file.display(), remote_file);

        let file = File::open(local_file)?;
        let bytes = self.upload(BufReader::new(file), remote_file)?;

        log::info!("Upload complete: {} ({} bytes)", remote_file, bytes);
        Ok(bytes)
    }

    /// Download `remote_file` into an arbitrary sink
    pub fn download<W: Write>(&self, remote_file: &str, sink: W) -> Result<u64, TransferError> {
        self.session()?.download(remote_file, sink)
    }

    /// Upload the contents of an arbitrary source as `remote_file`
    pub fn upload<R: Read>(&self, source: R, remote_file: &str) -> Result<u64, TransferError> {
        self.session()?.upload(remote_file, source)
    }

    /// Bind a fresh local endpoint for one transfer
    fn session(&self) -> Result<TransferSession<UdpSocket>, TransferError> {
        let server_addr = self.config.server_addr();
        let local_addr: SocketAddr = if server_addr.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local_addr)?;
        log::debug!(
            "Bound {} for transfer with {}",
            socket.local_addr()?,
            server_addr
        );
        Ok(TransferSession::new(
            socket,
            server_addr,
            &self.config.transfer_options(),
        )?)
    }
}

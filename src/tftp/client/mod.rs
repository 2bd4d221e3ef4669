//! TFTP client implementation
//!
//! - `client`: File level GET/PUT operations
//! - `session`: Stop-and-wait transfer state machine
//! - `config`: Client configuration
//! - `error`: Transfer failure causes

mod client;
mod config;
mod error;
mod session;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_MAX_RETRIES, DEFAULT_PORT, DEFAULT_TIMEOUT, FileConfig};
pub use error::TransferError;
pub use session::{TransferOptions, TransferSession};

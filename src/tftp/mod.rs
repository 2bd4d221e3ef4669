//! TFTP (Trivial File Transfer Protocol) client
//!
//! This module implements the client side of
//! [RFC 1350](https://www.rfc-editor.org/rfc/rfc1350) TFTP Protocol version 2:
//! one file per transfer, one outstanding block at a time.
//!
//! ## Module Structure
//!
//! ```text
//! tftp/
//! ├── core/           # Core protocol implementation
//! │   ├── packet      # Packet serialization/deserialization
//! │   ├── convert     # Transfer modes and netascii conversion
//! │   └── socket      # Socket abstraction layer
//! │
//! └── client/         # TFTP client
//!     ├── client      # GET/PUT front end
//!     ├── session     # Stop-and-wait transfer state machine
//!     └── config      # Client configuration
//! ```
//!
//! ## Usage Examples
//!
//! ### Download a file
//!
//! ```rust,no_run
//! use tftpc::tftp::client::{Client, ClientConfig};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69)
//!     .with_timeout(Duration::from_secs(2));
//!
//! let client = Client::new(config);
//! let bytes = client.get("pxelinux.0", Path::new("pxelinux.0")).unwrap();
//! println!("received {} bytes", bytes);
//! ```

// Submodules
pub mod client;
pub mod core;

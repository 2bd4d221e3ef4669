use std::io;

use thiserror::Error;

use crate::tftp::core::{ConvertError, ErrorCode, PacketError};

/// Terminal cause of a failed transfer
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("server error {code} ({}): {message}", describe(*.code))]
    Remote { code: u16, message: String },

    #[error("no usable reply after {retries} retransmissions")]
    Timeout { retries: u8 },

    #[error("local I/O error: {0}")]
    LocalIo(#[from] io::Error),

    #[error("netascii conversion failed: {0}")]
    Encoding(#[from] ConvertError),

    #[error(transparent)]
    Malformed(#[from] PacketError),
}

impl TransferError {
    /// Error code sent by the server, if the transfer was rejected remotely
    pub fn remote_code(&self) -> Option<u16> {
        match self {
            TransferError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn describe(code: u16) -> &'static str {
    ErrorCode::from_u16(code)
        .map(ErrorCode::message)
        .unwrap_or("unknown code")
}

//! TFTP core protocol implementation
//!
//! This module contains the core components of the TFTP protocol:
//! - `packet`: Packet serialization and deserialization
//! - `convert`: Transfer modes and netascii line ending conversion
//! - `socket`: Socket abstraction layer

pub mod convert;
mod packet;
mod socket;

// Public core types
pub use convert::{Convert, ConvertError, Mode};
pub use packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Packet, PacketError};
pub use socket::{Socket, is_timeout};

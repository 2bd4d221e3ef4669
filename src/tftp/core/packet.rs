use std::fmt;
use std::io;

use thiserror::Error;

use super::convert::Mode;

/// Maximum payload carried by a single DATA packet (RFC 1350)
pub const BLOCK_SIZE: usize = 512;

/// Largest datagram a plain RFC 1350 peer is expected to accept
pub const MAX_PACKET_SIZE: usize = BLOCK_SIZE + 4;

const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

/// Packet encoding/decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("invalid packet field: {0}")]
    InvalidField(String),

    #[error("packet too large: maximum {max}, got {actual}")]
    TooLarge { max: usize, actual: usize },
}

fn malformed(reason: impl Into<String>) -> PacketError {
    PacketError::Malformed(reason.into())
}

/// TFTP error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTid),
            6 => Some(Self::FileExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Canonical message for this code
    pub fn message(self) -> &'static str {
        match self {
            Self::Undefined => "Not defined",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTid => "Unknown transfer ID",
            Self::FileExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }

    /// Translates a local I/O failure into the code reported to the peer
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::WriteZero => Self::DiskFull,
            io::ErrorKind::PermissionDenied => Self::AccessViolation,
            io::ErrorKind::NotFound => Self::FileNotFound,
            io::ErrorKind::AlreadyExists => Self::FileExists,
            _ => Self::Undefined,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A single RFC 1350 packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq { filename: String, mode: Mode },
    Wrq { filename: String, mode: Mode },
    Data { block_num: u16, data: Vec<u8> },
    Ack(u16),
    Error { code: u16, msg: String },
}

impl Packet {
    /// Builds an ERROR packet, falling back to the canonical message when `msg` is empty
    pub fn error(code: ErrorCode, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let msg = if msg.is_empty() {
            code.message().to_string()
        } else {
            msg
        };
        Packet::Error {
            code: code as u16,
            msg,
        }
    }

    pub fn opcode(&self) -> u16 {
        match self {
            Packet::Rrq { .. } => OPCODE_RRQ,
            Packet::Wrq { .. } => OPCODE_WRQ,
            Packet::Data { .. } => OPCODE_DATA,
            Packet::Ack(_) => OPCODE_ACK,
            Packet::Error { .. } => OPCODE_ERROR,
        }
    }

    /// Encode the packet into wire bytes
    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = Vec::with_capacity(MAX_PACKET_SIZE);
        buf.extend_from_slice(&self.opcode().to_be_bytes());

        match self {
            Packet::Rrq { filename, mode } | Packet::Wrq { filename, mode } => {
                push_cstr(&mut buf, filename, "filename")?;
                push_cstr(&mut buf, &mode.to_string(), "mode")?;
                if buf.len() > MAX_PACKET_SIZE {
                    return Err(PacketError::TooLarge {
                        max: MAX_PACKET_SIZE,
                        actual: buf.len(),
                    });
                }
            }
            Packet::Data { block_num, data } => {
                if data.len() > BLOCK_SIZE {
                    return Err(PacketError::TooLarge {
                        max: BLOCK_SIZE,
                        actual: data.len(),
                    });
                }
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Packet::Ack(block_num) => {
                buf.extend_from_slice(&block_num.to_be_bytes());
            }
            Packet::Error { code, msg } => {
                buf.extend_from_slice(&code.to_be_bytes());
                push_cstr(&mut buf, msg, "error message")?;
            }
        }

        Ok(buf)
    }

    /// Decode wire bytes into a packet
    pub fn deserialize(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < 2 {
            return Err(malformed(format!("{} byte datagram", buf.len())));
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let body = &buf[2..];

        match opcode {
            OPCODE_RRQ | OPCODE_WRQ => {
                let (filename, rest) = take_cstr(body, "filename")?;
                let (mode, rest) = take_cstr(rest, "mode")?;
                if !rest.is_empty() {
                    return Err(malformed("trailing bytes after request mode"));
                }
                let mode: Mode = mode
                    .parse()
                    .map_err(|_| malformed(format!("unsupported mode '{}'", mode)))?;
                let filename = filename.to_string();
                if opcode == OPCODE_RRQ {
                    Ok(Packet::Rrq { filename, mode })
                } else {
                    Ok(Packet::Wrq { filename, mode })
                }
            }
            OPCODE_DATA => {
                let block_num = read_u16(body, "DATA")?;
                let data = &body[2..];
                if data.len() > BLOCK_SIZE {
                    return Err(malformed(format!(
                        "DATA payload of {} bytes exceeds {}",
                        data.len(),
                        BLOCK_SIZE
                    )));
                }
                Ok(Packet::Data {
                    block_num,
                    data: data.to_vec(),
                })
            }
            OPCODE_ACK => {
                if body.len() != 2 {
                    return Err(malformed(format!("ACK of {} bytes", buf.len())));
                }
                Ok(Packet::Ack(read_u16(body, "ACK")?))
            }
            OPCODE_ERROR => {
                let code = read_u16(body, "ERROR")?;
                // Some servers omit the terminating NUL
                let rest = &body[2..];
                let text = match rest.iter().position(|&b| b == 0) {
                    Some(end) => &rest[..end],
                    None => rest,
                };
                Ok(Packet::Error {
                    code,
                    msg: String::from_utf8_lossy(text).into_owned(),
                })
            }
            other => Err(malformed(format!("unknown opcode {}", other))),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Rrq { filename, mode } => write!(f, "RRQ {} ({})", filename, mode),
            Packet::Wrq { filename, mode } => write!(f, "WRQ {} ({})", filename, mode),
            Packet::Data { block_num, data } => {
                write!(f, "DATA #{} ({} bytes)", block_num, data.len())
            }
            Packet::Ack(block_num) => write!(f, "ACK #{}", block_num),
            Packet::Error { code, msg } => write!(f, "ERROR {}: {}", code, msg),
        }
    }
}

fn push_cstr(buf: &mut Vec<u8>, value: &str, field: &str) -> Result<(), PacketError> {
    if value.as_bytes().contains(&0) {
        return Err(PacketError::InvalidField(format!("{} contains NUL", field)));
    }
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    Ok(())
}

fn take_cstr<'a>(buf: &'a [u8], field: &str) -> Result<(&'a str, &'a [u8]), PacketError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed(format!("unterminated {}", field)))?;
    let value = std::str::from_utf8(&buf[..end])
        .map_err(|_| malformed(format!("{} is not valid UTF-8", field)))?;
    Ok((value, &buf[end + 1..]))
}

fn read_u16(body: &[u8], kind: &str) -> Result<u16, PacketError> {
    if body.len() < 2 {
        return Err(malformed(format!("truncated {} packet", kind)));
    }
    Ok(u16::from_be_bytes([body[0], body[1]]))
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;

/// Hosts whose native line terminator is CR LF rather than LF
const NATIVE_CRLF: bool = cfg!(windows);

/// Transfer mode carried in RRQ/WRQ packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[value(name = "netascii")]
    NetAscii,
    #[default]
    Octet,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::NetAscii => f.write_str("netascii"),
            Mode::Octet => f.write_str("octet"),
        }
    }
}

impl FromStr for Mode {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Ok(Mode::NetAscii),
            "octet" => Ok(Mode::Octet),
            _ => Err(ConvertError::UnsupportedMode(s.to_string())),
        }
    }
}

/// Netascii transcoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("byte 0x{0:02x} cannot be represented in netascii")]
    NonAscii(u8),

    #[error("carriage return followed by 0x{0:02x} in netascii stream")]
    BareCarriageReturn(u8),

    #[error("unsupported transfer mode '{0}'")]
    UnsupportedMode(String),
}

/// Line ending conversion for one transfer
///
/// Netascii streams are converted in blocks, so a CR LF (or CR NUL) pair may be
/// split across two calls. The converter keeps the dangling CR between calls;
/// call the matching `finish_*` once the stream ends.
#[derive(Debug)]
pub struct Convert {
    mode: Mode,
    pending_cr: bool,
}

impl Convert {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            pending_cr: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Host bytes to wire bytes
    pub fn to_wire(&mut self, data: &[u8]) -> Result<Vec<u8>, ConvertError> {
        if self.mode == Mode::Octet {
            return Ok(data.to_vec());
        }

        let mut out = Vec::with_capacity(data.len() + data.len() / 8);
        for &byte in data {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == LF && NATIVE_CRLF {
                    out.extend_from_slice(&[CR, LF]);
                    continue;
                }
                out.extend_from_slice(&[CR, NUL]);
            }
            match byte {
                CR => self.pending_cr = true,
                LF => out.extend_from_slice(&[CR, LF]),
                b if b.is_ascii() => out.push(b),
                b => return Err(ConvertError::NonAscii(b)),
            }
        }
        Ok(out)
    }

    /// Flushes a CR held back by `to_wire`
    pub fn finish_to_wire(&mut self) -> Vec<u8> {
        if std::mem::take(&mut self.pending_cr) {
            vec![CR, NUL]
        } else {
            Vec::new()
        }
    }

    /// Wire bytes to host bytes
    pub fn from_wire(&mut self, data: &[u8]) -> Result<Vec<u8>, ConvertError> {
        if self.mode == Mode::Octet {
            return Ok(data.to_vec());
        }

        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            if self.pending_cr {
                self.pending_cr = false;
                match byte {
                    LF => push_native_newline(&mut out),
                    NUL => out.push(CR),
                    other => return Err(ConvertError::BareCarriageReturn(other)),
                }
                continue;
            }
            match byte {
                CR => self.pending_cr = true,
                b if b.is_ascii() => out.push(b),
                b => return Err(ConvertError::NonAscii(b)),
            }
        }
        Ok(out)
    }

    /// Flushes a CR left dangling at the very end of a received stream
    pub fn finish_from_wire(&mut self) -> Vec<u8> {
        if std::mem::take(&mut self.pending_cr) {
            vec![CR]
        } else {
            Vec::new()
        }
    }
}

fn push_native_newline(out: &mut Vec<u8>) {
    if NATIVE_CRLF {
        out.push(CR);
    }
    out.push(LF);
}

/// One-shot conversion of a complete host buffer to wire bytes
pub fn to_wire(data: &[u8], mode: Mode) -> Result<Vec<u8>, ConvertError> {
    let mut convert = Convert::new(mode);
    let mut out = convert.to_wire(data)?;
    out.extend(convert.finish_to_wire());
    Ok(out)
}

/// One-shot conversion of a complete wire buffer to host bytes
pub fn from_wire(data: &[u8], mode: Mode) -> Result<Vec<u8>, ConvertError> {
    let mut convert = Convert::new(mode);
    let mut out = convert.from_wire(data)?;
    out.extend(convert.finish_from_wire());
    Ok(out)
}

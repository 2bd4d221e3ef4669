//! RFC 1350 TFTP client library

pub mod tftp;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Most failures inside the peer state machine are recovered locally (a
//! failed dial is retried on the next tick, a malformed frame is dropped
//! with a diagnostic). The variants here cover the operations that *do*
//! surface to callers: node construction, transport start, discovery start.

use crate::ser::CodecError;
use std::fmt;
use std::io;

/// Errors surfaced by the public API.
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration (empty registration name, bad host name).
    Config(String),
    /// Listener failed to bind its port.
    Bind(String),
    /// Outbound dial failed (resolution, TCP connect or timeout).
    Connect(String),
    /// WebSocket handshake failed or timed out.
    Handshake(String),
    /// Send/receive failed on an established link.
    Transport(String),
    /// Service discovery daemon failed to start or register.
    Discovery(String),
    /// Wire encode/decode failed.
    Codec(CodecError),
    /// Underlying I/O error.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(reason) => write!(f, "configuration error: {}", reason),
            Error::Bind(reason) => write!(f, "bind failed: {}", reason),
            Error::Connect(reason) => write!(f, "connect failed: {}", reason),
            Error::Handshake(reason) => write!(f, "websocket handshake failed: {}", reason),
            Error::Transport(reason) => write!(f, "transport error: {}", reason),
            Error::Discovery(reason) => write!(f, "discovery error: {}", reason),
            Error::Codec(err) => write!(f, "codec error: {}", err),
            Error::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Codec(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::Codec(err)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_variants() {
        let err = Error::Bind("address in use".into());
        assert_eq!(format!("{}", err), "bind failed: address in use");

        let err = Error::Connect("no route to host".into());
        assert_eq!(format!("{}", err), "connect failed: no route to host");

        let err = Error::Discovery("daemon unavailable".into());
        assert_eq!(format!("{}", err), "discovery error: daemon unavailable");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "dial timeout");
        let err: Error = io_err.into();
        match err {
            Error::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error {:?}", other),
        }
    }
}

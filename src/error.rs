//! Error types for the SOCKS5 session, dial and relay paths.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::address::TargetAddr;

/// Malformed or unsupported client input during the handshake.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("not SOCKS5: version byte {0:#04x}")]
    BadVersion(u8),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unknown address type {0:#04x}")]
    BadAddressType(u8),

    #[error("message truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("invalid domain name")]
    InvalidDomain,
}

/// Failure to reach the requested target.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),
}

/// Failure while bytes are flowing between client and target.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Everything that can end a session early. All of it is handled by
/// closing both sockets; nothing is sent back to the client.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: TargetAddr,
        #[source]
        source: DialError,
    },

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("client socket error: {0}")]
    Io(#[from] io::Error),
}

//! Error types for the gateway.
//!
//! Everything except [`GatewayError::BindFailure`] and fatal accept errors
//! is contained at the session boundary and never reaches the listener.

use std::io;
use thiserror::Error;

/// Reasons a client's handshake request was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("header block is not valid UTF-8")]
    InvalidUtf8,

    #[error("request line must have three tokens: {0:?}")]
    RequestLine(String),

    #[error("unsupported request verb: {0}")]
    Verb(String),

    #[error("header line without separator: {0:?}")]
    HeaderLine(String),

    #[error("missing header {0}")]
    MissingKey(&'static str),

    #[error("key contains no spaces")]
    NoSpaces,

    #[error("key contains no digits")]
    NoDigits,

    #[error("key value out of range")]
    KeyOverflow,
}

/// Errors produced by the listener and by individual sessions.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("malformed handshake: {0}")]
    MalformedHandshake(#[from] HandshakeError),

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("socket i/o: {0}")]
    SocketIo(#[from] io::Error),

    #[error("read timed out")]
    ReadTimeout,

    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GatewayError>;

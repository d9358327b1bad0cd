//! Error types for the relay server

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control-protocol violations, recoverable per connection
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Invalid payload length: {0}")]
    InvalidLength(String),

    #[error("Declared payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(usize),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer closed the connection")]
    ConnectionClosed,

    #[error("Timed out reading a declared payload")]
    PayloadTimeout,
}

/// File transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Empty file name after sanitization")]
    EmptyName,

    #[error("Upload aborted: {0}")]
    Aborted(String),
}

/// Media-plane errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for Swimlane

use thiserror::Error;

/// Main error type for Swimlane
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No trusted forwarded-identity header on inbound request")]
    IdentityRequired,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type alias for Swimlane
pub type Result<T> = std::result::Result<T, Error>;

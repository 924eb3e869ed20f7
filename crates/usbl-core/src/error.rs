//! Crate-wide error taxonomy for the USBL core

use thiserror::Error;

/// Core error type shared across every USBL crate
#[derive(Error, Debug)]
pub enum UsblError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("DAQ device absent")]
    DeviceAbsent,

    #[error("DAQ device does not support the requested capability: {0}")]
    DeviceUnsupported(String),

    #[error("raw scan buffer still contains sentinel samples")]
    BufferIncomplete,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("DAC echo did not match the command that was sent")]
    ProtocolMismatch,

    #[error("TCP peer lost: {0}")]
    PeerLost(String),

    #[error("transient I/O error after exhausting retries: {0}")]
    TransientIo(String),

    #[error("signal synthesis exceeded its declared capacity")]
    CapacityExceeded,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    ConfigParse(String),
}

/// Result type alias used throughout the USBL crates
pub type UsblResult<T> = Result<T, UsblError>;

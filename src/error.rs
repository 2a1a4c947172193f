//! Error types for mdns-core.

use thiserror::Error;

/// Errors that can occur during mDNS operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound bytes could not be decoded as a DNS message.
    #[error("malformed DNS message: {0}")]
    Malformed(String),

    /// An outbound message exceeds the maximum UDP payload.
    #[error("message of {size} bytes exceeds maximum payload of {max} bytes")]
    MessageTooLarge {
        /// Serialized size of the offending message.
        size: usize,
        /// Maximum payload in effect.
        max: usize,
    },

    /// A send or query method was called before `start`.
    #[error("service has not been started")]
    NotStarted,

    /// A `resolve` call was cancelled by its cancellation token.
    #[error("resolve was cancelled")]
    Cancelled,

    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

/// Result type alias for mdns-core operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for DNS operations

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for DNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling DNS queries
///
/// Per-query errors are logged and the query is dropped; the client's own
/// retry logic takes over.
#[derive(Debug, Error)]
pub enum Error {
    /// DNS query/response error
    #[error("DNS error: {0}")]
    Dns(String),

    /// The listener could not be bound
    #[error("failed to bind DNS proxy to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Upstream proxy tunnel could not be set up
    #[error("upstream: {0}")]
    Upstream(#[from] hop_socks::Error),

    /// No reply within the configured timeout
    #[error("DNS query timed out")]
    Timeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

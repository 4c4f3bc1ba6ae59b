//! Error types for the intercept proxy

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for intercept proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the intercept proxy
///
/// Only [`Error::Bind`] escapes the listener; everything else ends a single
/// flow and is logged.
#[derive(Debug, Error)]
pub enum Error {
    /// The leading request could not be understood
    #[error("malformed request: {0}")]
    Parse(String),

    /// The listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Upstream proxy handshake failed
    #[error("upstream: {0}")]
    Upstream(#[from] hop_socks::Error),

    /// Direct connection to the destination did not finish in time
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// The flow was torn down by a routing update or shutdown
    #[error("flow cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

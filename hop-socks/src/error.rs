//! Error types for upstream proxy handshakes

use thiserror::Error;

/// Result type alias for upstream proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while negotiating with an upstream proxy
///
/// Every variant aborts only the handshake in progress; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with an unexpected protocol version
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u8, actual: u8 },

    /// SOCKS5 username/password sub-negotiation was rejected
    #[error("authentication failed (status {0})")]
    AuthenticationFailed(u8),

    /// The SOCKS5 server accepted none of the offered methods
    #[error("no acceptable authentication method")]
    NoAcceptableAuthMethod,

    /// The SOCKS5 server refused the request
    #[error("upstream connect failed (reply code {0:#04x})")]
    UpstreamConnectFailed(u8),

    /// The SOCKS4 server did not grant the request
    #[error("SOCKS4 request rejected (status {0})")]
    Socks4Rejected(u8),

    /// SOCKS4 needs an IPv4 destination and none could be found
    #[error("no IPv4 address for {0}")]
    NoIPv4Resolution(String),

    /// The peer closed before a complete message arrived
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Unknown SOCKS5 address type
    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// The HTTP proxy answered CONNECT with something other than 200
    #[error("HTTP CONNECT rejected: {0}")]
    HttpConnectRejected(String),

    /// Username or password longer than 255 bytes
    #[error("credential longer than 255 bytes")]
    CredentialTooLong,

    /// Domain name longer than 255 bytes
    #[error("domain name longer than 255 bytes")]
    DomainTooLong,

    /// The operation did not finish in time
    #[error("timed out")]
    Timeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEndOfStream
        } else {
            Error::Io(e)
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

//! Error types for the router engine

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the router
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Intercept proxy error
    #[error("intercept proxy: {0}")]
    Intercept(hop_intercept::Error),

    /// DNS proxy error
    #[error("DNS proxy: {0}")]
    Dns(hop_dns::Error),

    /// Upstream proxy error
    #[error("upstream proxy: {0}")]
    Socks(#[from] hop_socks::Error),

    /// System hook script error
    #[error("script error: {0}")]
    Script(String),

    /// Already running
    #[error("router is already running")]
    AlreadyRunning,

    /// Not running
    #[error("router is not running")]
    NotRunning,
}

impl Error {
    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}

impl From<hop_intercept::Error> for Error {
    fn from(e: hop_intercept::Error) -> Self {
        match e {
            hop_intercept::Error::Bind { addr, source } => Error::Bind { addr, source },
            other => Error::Intercept(other),
        }
    }
}

impl From<hop_dns::Error> for Error {
    fn from(e: hop_dns::Error) -> Self {
        match e {
            hop_dns::Error::Bind { addr, source } => Error::Bind { addr, source },
            other => Error::Dns(other),
        }
    }
}

//! hop-dns - DNS redirect proxy
//!
//! The host's resolver is pointed at this proxy. Each query's name is matched
//! against the host rules of the shared [`Router`](hop_rules::Router):
//! - **Proxy**: carried to the fallback resolver through the upstream proxy,
//!   either over a TCP tunnel with DNS-over-TCP framing or, for SOCKS5
//!   upstreams when enabled, over a UDP association
//! - **Direct** and **Block**: forwarded over UDP to the fallback resolver.
//!   Block rules may be scoped to apps, which a query cannot name, so they
//!   are reported in the flow log but never stop resolution.
//!
//! Every query is handled in its own task; there is no cache.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hop_dns::{DnsProxy, DnsSettings};
//! use hop_rules::Router;
//!
//! # async fn example() -> hop_dns::Result<()> {
//! let router = Arc::new(Router::default());
//! let proxy = DnsProxy::bind("127.0.0.1:5353".parse().unwrap(), router, DnsSettings::default(), None).await?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! proxy.run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod forward;
mod name;
mod proxy;

pub use error::{Error, Result};
pub use forward::{forward_direct, forward_socks5_udp, forward_tunneled, MAX_DNS_MESSAGE_SIZE};
pub use name::parse_query_name;
pub use proxy::{DnsProxy, DnsSettings};

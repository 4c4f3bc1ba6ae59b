//! hop-socks - upstream proxy client protocols
//!
//! Handshakes for the three kinds of upstream a flow can be tunneled through:
//! - [`http`]: `CONNECT` tunnels with optional Basic authorization
//! - [`socks4`]: SOCKS4 CONNECT (IPv4 destinations)
//! - [`socks5`]: SOCKS5 CONNECT and UDP ASSOCIATE, plus [`udp`] datagram framing
//!
//! [`connect_via`] dials an [`UpstreamProxy`](hop_rules::UpstreamProxy) and
//! runs the matching handshake, returning a stream ready for payload bytes.

mod addr;
mod error;
pub mod http;
pub mod socks4;
pub mod socks5;
pub mod udp;
mod upstream;

pub use addr::{TargetAddr, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};
pub use error::{Error, Result};
pub use socks5::UdpSession;
pub use upstream::{connect_via, handshake, probe, DEFAULT_CONNECT_TIMEOUT};

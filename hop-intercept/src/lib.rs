//! hop-intercept - local HTTP/HTTPS intercept proxy
//!
//! The host's HTTP and HTTPS traffic is pointed at this listener. For every
//! accepted connection the proxy:
//! 1. reads the leading request to find the destination ([`parse_request`])
//! 2. asks a [`ProcessResolver`] which program opened the connection
//! 3. resolves a routing decision through the shared [`Router`](hop_rules::Router)
//! 4. connects directly or through an upstream proxy and [`bridge`]s the bytes
//!
//! Each flow is registered in a [`FlowRegistry`] so a routing update can tear
//! all of them down at once.

mod bridge;
mod error;
mod process;
mod proxy;
mod registry;
mod request;

pub use bridge::{bridge, Closed};
pub use error::{Error, Result};
pub use process::{ProcessResolver, UnknownProcess, UNKNOWN_PROCESS};
pub use proxy::{InterceptHandle, InterceptProxy, FIRST_CHUNK_SIZE};
pub use registry::{FlowGuard, FlowRegistry};
pub use request::{parse_request, RequestHead};

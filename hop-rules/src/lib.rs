//! hop-rules - per-application routing rules
//!
//! This crate holds the routing data model and the decision engine shared by
//! the TCP intercept proxy and the DNS redirect proxy:
//! - [`UpstreamProxy`]: an HTTP/SOCKS4/SOCKS5 upstream
//! - [`Rule`] and [`RoutingConfig`]: blacklist and whitelist rule lists
//! - [`resolve`]: the pure (app, host) -> [`Decision`] function
//! - [`Router`]: the atomically swappable snapshot both listeners read
//!
//! # Example
//!
//! ```
//! use hop_rules::{resolve, ProxyKind, RoutingConfig, Rule, RuleAction, UpstreamProxy};
//!
//! let proxies = vec![UpstreamProxy::new("main", ProxyKind::Socks5, "127.0.0.1", 1080)];
//! let config = RoutingConfig {
//!     main_proxy: Some("main".into()),
//!     blacklist: vec![Rule::new(["*"], ["ads.example.com"], RuleAction::Block)],
//!     ..Default::default()
//! };
//!
//! assert!(resolve("chrome.exe", "ads.example.com", &config, &proxies).is_blocked());
//! assert_eq!(
//!     resolve("chrome.exe", "other.com", &config, &proxies).proxy.map(|p| p.id),
//!     Some("main".to_string())
//! );
//! ```

mod engine;
mod event;
mod proxy;
mod router;
mod rule;

pub use engine::{resolve, resolve_host, Decision};
pub use event::{FlowEvent, FlowOutcome, Transport};
pub use proxy::{ProxyKind, UpstreamProxy};
pub use router::{Router, RoutingSnapshot};
pub use rule::{RoutingConfig, RoutingMode, Rule, RuleAction, WILDCARD};

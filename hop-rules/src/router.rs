//! Shared routing state
//!
//! The TCP and DNS listeners read the current configuration on every flow.
//! Updates replace the whole snapshot at once, so a flow always resolves
//! against one consistent generation of rules and proxies.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::engine::{self, Decision};
use crate::proxy::UpstreamProxy;
use crate::rule::RoutingConfig;

/// One configuration generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    /// Rules and mode
    pub config: RoutingConfig,
    /// Every known upstream proxy, enabled or not
    pub proxies: Vec<UpstreamProxy>,
}

impl RoutingSnapshot {
    /// Create a snapshot
    pub fn new(config: RoutingConfig, proxies: Vec<UpstreamProxy>) -> Self {
        Self { config, proxies }
    }

    /// Look up a proxy by id, enabled or not
    pub fn proxy(&self, id: &str) -> Option<&UpstreamProxy> {
        self.proxies.iter().find(|p| p.id == id)
    }
}

/// Atomically swappable routing snapshot shared by all listeners
#[derive(Debug, Default)]
pub struct Router {
    current: ArcSwap<RoutingSnapshot>,
}

impl Router {
    /// Create a router holding `snapshot`
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// The snapshot new flows resolve against
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Replace the snapshot; flows already past their decision keep theirs
    pub fn update(&self, snapshot: RoutingSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Resolve a TCP flow against the current snapshot
    pub fn resolve(&self, app: &str, host: &str) -> Decision {
        let snapshot = self.current.load();
        engine::resolve(app, host, &snapshot.config, &snapshot.proxies)
    }

    /// Resolve a DNS query against the current snapshot
    pub fn resolve_host(&self, host: &str) -> Decision {
        let snapshot = self.current.load();
        engine::resolve_host(host, &snapshot.config, &snapshot.proxies)
    }
}

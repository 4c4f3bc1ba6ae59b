//! Active flow registry
//!
//! Every accepted connection registers a cancellation token here for as long
//! as its task runs. A routing update cancels them all at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Concurrent map of live flows keyed by a generated id
#[derive(Debug, Default)]
pub struct FlowRegistry {
    next_id: AtomicU64,
    flows: DashMap<u64, CancellationToken>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new flow
    ///
    /// The flow stays registered until the returned guard is dropped.
    pub fn register(self: &Arc<Self>) -> FlowGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.flows.insert(id, token.clone());
        FlowGuard {
            id,
            token,
            registry: Arc::clone(self),
        }
    }

    /// Number of live flows
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Cancel and unregister every live flow
    ///
    /// Returns how many flows were cancelled. The registry is empty when this
    /// returns, even if the flow tasks have not finished unwinding yet.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<u64> = self.flows.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, token)) = self.flows.remove(&id) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Registration of one flow; unregisters on drop
#[derive(Debug)]
pub struct FlowGuard {
    id: u64,
    token: CancellationToken,
    registry: Arc<FlowRegistry>,
}

impl FlowGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled when the flow must be torn down
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        self.registry.flows.remove(&self.id);
    }
}

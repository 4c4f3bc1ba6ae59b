//! Router events and state management

use std::net::SocketAddr;

use hop_rules::FlowEvent;

/// Router lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running
    Stopped,
    /// Binding listeners and applying system hooks
    Starting,
    /// Listeners are accepting traffic
    Running,
    /// Shutting down
    Stopping,
}

impl EngineState {
    /// Check if the router is in an active state
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Starting | EngineState::Running)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            EngineState::Stopped => "Stopped",
            EngineState::Starting => "Starting...",
            EngineState::Running => "Running",
            EngineState::Stopping => "Stopping...",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Events emitted by the router engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// State changed
    StateChanged { old: EngineState, new: EngineState },

    /// Listeners are bound
    Listening {
        /// Intercept proxy address
        http: SocketAddr,
        /// DNS proxy address, if enabled
        dns: Option<SocketAddr>,
    },

    /// A flow or DNS query was routed
    Flow(FlowEvent),

    /// Routing was replaced and existing flows were torn down
    RoutingUpdated {
        /// Number of flows that were force-closed
        flows_closed: usize,
    },

    /// Error occurred
    Error {
        /// Error message
        message: String,
    },
}

/// Event handler trait for receiving router events
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a router event
    async fn on_event(&self, event: EngineEvent);
}

/// Simple event handler that logs events
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::StateChanged { old, new } => {
                log::info!("Router state: {} -> {}", old, new);
            }
            EngineEvent::Listening { http, dns } => match dns {
                Some(dns) => log::info!("Listening: http={}, dns={}", http, dns),
                None => log::info!("Listening: http={}", http),
            },
            EngineEvent::Flow(flow) => {
                log::info!("{}", flow);
            }
            EngineEvent::RoutingUpdated { flows_closed } => {
                log::info!("Routing updated, {} flows closed", flows_closed);
            }
            EngineEvent::Error { message } => {
                log::error!("Error: {}", message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(EngineState::Starting.is_active());
        assert!(EngineState::Running.is_active());
        assert!(!EngineState::Stopping.is_active());
        assert!(!EngineState::Stopped.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Running.to_string(), "Running");
        assert_eq!(EngineState::Starting.to_string(), "Starting...");
    }
}

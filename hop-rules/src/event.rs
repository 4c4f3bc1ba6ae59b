//! Connection log records

use crate::engine::Decision;
use crate::rule::RuleAction;

/// Listener that saw the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Dns,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Dns => write!(f, "dns"),
        }
    }
}

/// Routing outcome of a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Blocked,
    Direct,
    Proxied { proxy_id: String },
}

impl From<&Decision> for FlowOutcome {
    fn from(decision: &Decision) -> Self {
        match (decision.action, &decision.proxy) {
            (RuleAction::Block, _) => FlowOutcome::Blocked,
            (RuleAction::Proxy, Some(p)) => FlowOutcome::Proxied {
                proxy_id: p.id.clone(),
            },
            _ => FlowOutcome::Direct,
        }
    }
}

impl std::fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowOutcome::Blocked => write!(f, "blocked"),
            FlowOutcome::Direct => write!(f, "direct"),
            FlowOutcome::Proxied { proxy_id } => write!(f, "proxied via {}", proxy_id),
        }
    }
}

/// One resolved flow, as reported to the connection log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEvent {
    /// Owning process name (empty for DNS)
    pub app: String,
    /// Destination host or queried name
    pub host: String,
    /// Destination port (53 for DNS)
    pub port: u16,
    /// Listener that saw the flow
    pub transport: Transport,
    /// What the router decided
    pub outcome: FlowOutcome,
}

impl FlowEvent {
    /// Build an event from a routing decision
    pub fn new(
        transport: Transport,
        app: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        decision: &Decision,
    ) -> Self {
        Self {
            app: app.into(),
            host: host.into(),
            port,
            transport,
            outcome: decision.into(),
        }
    }
}

impl std::fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let app = if self.app.is_empty() { "-" } else { &self.app };
        write!(
            f,
            "[{}] {} -> {}:{} {}",
            self.transport, app, self.host, self.port, self.outcome
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyKind, UpstreamProxy};

    #[test]
    fn test_outcome_from_decision() {
        assert_eq!(FlowOutcome::from(&Decision::block()), FlowOutcome::Blocked);
        assert_eq!(FlowOutcome::from(&Decision::direct()), FlowOutcome::Direct);

        let p = UpstreamProxy::new("corp", ProxyKind::Socks5, "10.1.1.1", 1080);
        assert_eq!(
            FlowOutcome::from(&Decision::proxy(p)),
            FlowOutcome::Proxied {
                proxy_id: "corp".into()
            }
        );
    }

    #[test]
    fn test_event_display() {
        let e = FlowEvent::new(Transport::Tcp, "curl", "example.com", 443, &Decision::block());
        assert_eq!(e.to_string(), "[tcp] curl -> example.com:443 blocked");

        let d = FlowEvent::new(Transport::Dns, "", "example.com", 53, &Decision::direct());
        assert_eq!(d.to_string(), "[dns] - -> example.com:53 direct");
    }
}

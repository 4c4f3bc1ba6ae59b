//! DNS redirect proxy server
//!
//! Listens for DNS queries on a local address, decides per queried name
//! whether the query goes straight to the fallback resolver or through an
//! upstream proxy, and relays the reply to the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hop_rules::{FlowEvent, ProxyKind, Router, RuleAction, Transport};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Error, Result};
use crate::forward::{forward_direct, forward_socks5_udp, forward_tunneled, MAX_DNS_MESSAGE_SIZE};
use crate::name::{parse_query_name, HEADER_LEN};

/// Resolver and transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSettings {
    /// Resolver every query is ultimately sent to
    pub fallback: SocketAddr,
    /// Bound on each send, receive and tunnel setup
    pub timeout: Duration,
    /// Use SOCKS5 UDP ASSOCIATE instead of a TCP tunnel for SOCKS5 upstreams
    pub socks5_udp: bool,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            fallback: SocketAddr::from(([8, 8, 8, 8], 53)),
            timeout: Duration::from_secs(2),
            socks5_udp: false,
        }
    }
}

/// DNS proxy server
pub struct DnsProxy {
    socket: Arc<UdpSocket>,
    router: Arc<Router>,
    settings: Arc<DnsSettings>,
    events: Option<mpsc::Sender<FlowEvent>>,
}

impl DnsProxy {
    /// Bind the listening socket
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<Router>,
        settings: DnsSettings,
        events: Option<mpsc::Sender<FlowEvent>>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
            router,
            settings: Arc::new(settings),
            events,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the DNS proxy server until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        log::info!(
            "DNS proxy listening on {}, fallback {}",
            self.socket.local_addr()?,
            self.settings.fallback
        );

        let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("DNS proxy shutting down");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let query = buf[..len].to_vec();
                            let socket = self.socket.clone();
                            let router = self.router.clone();
                            let settings = self.settings.clone();
                            let events = self.events.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_query(&socket, &router, &settings, events.as_ref(), &query, src).await {
                                    log::debug!("DNS query from {} failed: {}", src, e);
                                }
                            });
                        }
                        Err(e) => {
                            log::error!("DNS proxy recv error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Handle a single DNS query
async fn handle_query(
    socket: &UdpSocket,
    router: &Router,
    settings: &DnsSettings,
    events: Option<&mpsc::Sender<FlowEvent>>,
    query: &[u8],
    src: SocketAddr,
) -> Result<()> {
    if query.len() < HEADER_LEN {
        return Err(Error::Dns("DNS query too short".into()));
    }

    let name = parse_query_name(query);
    let decision = router.resolve_host(&name);
    log::debug!("DNS {} from {} -> {}", name, src, decision);

    if let Some(tx) = events {
        let event = FlowEvent::new(Transport::Dns, "", &name, settings.fallback.port(), &decision);
        if let Err(e) = tx.try_send(event) {
            log::debug!("Dropping flow event: {}", e);
        }
    }

    // Queries carry no app, so a Block here is only logged. The TCP side
    // refuses the flow for the apps the rule names.
    let response = match (decision.action, decision.upstream()) {
        (RuleAction::Proxy, Some(proxy)) if settings.socks5_udp && proxy.kind == ProxyKind::Socks5 => {
            forward_socks5_udp(query, proxy, settings.fallback, settings.timeout).await?
        }
        (RuleAction::Proxy, Some(proxy)) => {
            forward_tunneled(query, proxy, settings.fallback, settings.timeout).await?
        }
        _ => forward_direct(query, settings.fallback, settings.timeout).await?,
    };

    socket
        .send_to(&response, src)
        .await
        .map_err(|e| Error::Dns(format!("failed to send DNS response: {}", e)))?;

    Ok(())
}

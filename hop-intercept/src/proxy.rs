//! Intercept proxy server
//!
//! Accepts the host's redirected HTTP/HTTPS connections, works out where each
//! one is headed and who opened it, asks the [`Router`] what to do, and then
//! bridges the client to its destination either directly or through an
//! upstream proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hop_rules::{FlowEvent, RoutingSnapshot, Router, RuleAction, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use crate::bridge::bridge;
use crate::error::{Error, Result};
use crate::process::ProcessResolver;
use crate::registry::FlowRegistry;
use crate::request::parse_request;

/// Size of the first read used to find the destination
pub const FIRST_CHUNK_SIZE: usize = 8 * 1024;

/// Pause after a failed accept, e.g. when the process is out of descriptors
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// State shared by the accept loop and every flow task
struct Shared {
    router: Arc<Router>,
    resolver: Arc<dyn ProcessResolver>,
    flows: Arc<FlowRegistry>,
    events: Option<mpsc::Sender<FlowEvent>>,
    connect_timeout: Duration,
}

/// Handle for reconfiguring a running proxy
#[derive(Clone)]
pub struct InterceptHandle {
    router: Arc<Router>,
    flows: Arc<FlowRegistry>,
}

impl InterceptHandle {
    /// Install a new routing snapshot and tear down every active flow
    ///
    /// Returns the number of flows that were cancelled.
    pub fn update_routing(&self, snapshot: RoutingSnapshot) -> usize {
        self.router.update(snapshot);
        let closed = self.flows.disconnect_all();
        log::info!("Routing updated, {} active flows closed", closed);
        closed
    }

    /// Live flow registry
    pub fn flows(&self) -> &Arc<FlowRegistry> {
        &self.flows
    }
}

/// Local HTTP/HTTPS intercept proxy
pub struct InterceptProxy {
    listener: TcpListener,
    shared: Shared,
}

impl InterceptProxy {
    /// Bind the listener
    ///
    /// A bind failure is returned here so the caller can refuse to start.
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<Router>,
        resolver: Arc<dyn ProcessResolver>,
        events: Option<mpsc::Sender<FlowEvent>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            listener,
            shared: Shared {
                router,
                resolver,
                flows: Arc::new(FlowRegistry::new()),
                events,
                connect_timeout: hop_socks::DEFAULT_CONNECT_TIMEOUT,
            },
        })
    }

    /// Bound on dialing a destination or upstream proxy
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.shared.connect_timeout = timeout;
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Live flow registry
    pub fn flows(&self) -> Arc<FlowRegistry> {
        self.shared.flows.clone()
    }

    /// Handle for routing updates, usable after [`run`](Self::run) took the proxy
    pub fn handle(&self) -> InterceptHandle {
        InterceptHandle {
            router: self.shared.router.clone(),
            flows: self.shared.flows.clone(),
        }
    }

    /// Install a new routing snapshot and tear down every active flow
    pub fn update_routing(&self, snapshot: RoutingSnapshot) -> usize {
        self.handle().update_routing(snapshot)
    }

    /// Accept connections until `shutdown` fires
    ///
    /// Active flows are cancelled on the way out.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local = self.listener.local_addr()?;
        log::info!("Intercept proxy listening on {}", local);

        let shared = Arc::new(self.shared);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Intercept proxy shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let shared = shared.clone();
                            tokio::spawn(async move {
                                handle_flow(shared, stream, peer).await;
                            });
                        }
                        Err(e) => accept_backoff(&e).await,
                    }
                }
            }
        }

        let closed = shared.flows.disconnect_all();
        if closed > 0 {
            log::debug!("Cancelled {} active flows on shutdown", closed);
        }
        Ok(())
    }
}

async fn accept_backoff(e: &std::io::Error) {
    log::error!("Intercept proxy accept error: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Own one accepted connection from accept to close
async fn handle_flow(shared: Arc<Shared>, mut client: TcpStream, peer: SocketAddr) {
    let guard = shared.flows.register();
    let mut remote: Option<TcpStream> = None;

    let result = tokio::select! {
        _ = guard.token().cancelled() => Err(Error::Cancelled),
        r = serve(&shared, &mut client, &mut remote, peer) => r,
    };

    match result {
        Ok(()) | Err(Error::Cancelled) => {}
        Err(e) => log::debug!("Flow {} from {} failed: {}", guard.id(), peer, e),
    }

    abort(client);
    if let Some(remote) = remote {
        abort(remote);
    }
}

async fn serve(shared: &Shared, client: &mut TcpStream, remote: &mut Option<TcpStream>, peer: SocketAddr) -> Result<()> {
    let mut buf = vec![0u8; FIRST_CHUNK_SIZE];
    let n = client.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let first = &buf[..n];
    let head = parse_request(first)?;

    // The client's source port is the local port on the owning process's side
    let app = shared.resolver.name_by_local_port(peer.port()).await;
    let decision = shared.router.resolve(&app, &head.host);
    log::debug!("{} {} {}:{} -> {}", app, head.method, head.host, head.port, decision);

    if let Some(events) = &shared.events {
        let event = FlowEvent::new(Transport::Tcp, &app, &head.host, head.port, &decision);
        if let Err(e) = events.try_send(event) {
            log::debug!("Dropping flow event: {}", e);
        }
    }

    let stream = match (decision.action, decision.upstream()) {
        (RuleAction::Block, _) => return Ok(()),
        (RuleAction::Proxy, Some(proxy)) => {
            hop_socks::connect_via(proxy, &head.host, head.port, shared.connect_timeout).await?
        }
        _ => dial(&head.host, head.port, shared.connect_timeout).await?,
    };
    let upstream = remote.insert(stream);

    if head.tunnel {
        client.write_all(CONNECT_ESTABLISHED).await?;
    } else {
        upstream.write_all(first).await?;
    }

    let (closed, copied) = bridge(&mut *client, &mut *upstream).await;
    log::trace!("Flow from {} ended, {:?} closed first ({:?})", peer, closed, copied);
    Ok(())
}

async fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::ConnectTimeout(format!("{}:{}", host, port)))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Close with zero linger so a half-closed peer cannot hold the socket
fn abort(stream: TcpStream) {
    if let Err(e) = socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
        log::trace!("set_linger failed: {}", e);
    }
    drop(stream);
}

//! Router engine implementation
//!
//! Owns the shared [`Router`] and runs the intercept and DNS listeners
//! against it, applies the OS hooks while running and puts them back on the
//! way out.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hop_dns::DnsProxy;
use hop_intercept::{InterceptHandle, InterceptProxy, ProcessResolver};
use hop_rules::{FlowEvent, Router};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinSet;

use crate::config::{routing_warnings, validate_proxies, Config};
use crate::error::{Error, Result};
use crate::event::{EngineEvent, EngineState, EventHandler, LoggingEventHandler};
use crate::process::default_resolver;
use crate::system::{ScriptSystemNetwork, SystemGuard, SystemNetwork};

/// Flow events buffered between the listeners and the event handler
const FLOW_EVENT_BUFFER: usize = 1024;

/// Outcome of probing one upstream proxy
#[derive(Debug)]
pub struct ProxyCheck {
    /// Proxy id
    pub id: String,
    /// `address:port` of the proxy
    pub endpoint: String,
    /// Time to a working tunnel, or why there was none
    pub result: std::result::Result<Duration, hop_socks::Error>,
}

/// Per-application traffic router
///
/// All methods take `&self`, so a running engine can be shared behind an
/// `Arc` and reconfigured from another task while [`start`](Self::start)
/// is still awaiting shutdown.
pub struct RouterEngine {
    /// Configuration the listeners were started with
    config: Config,

    /// Routing state shared with both listeners
    router: Arc<Router>,

    /// Event handler
    event_handler: Arc<dyn EventHandler>,

    /// Process identity lookup for intercepted connections
    resolver: Arc<dyn ProcessResolver>,

    /// OS proxy/DNS toggles
    system: Arc<dyn SystemNetwork>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    /// Engine state
    state: RwLock<EngineState>,

    /// Set while the intercept proxy is running
    intercept: Mutex<Option<InterceptHandle>>,
}

impl std::fmt::Debug for RouterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterEngine").finish_non_exhaustive()
    }
}

impl RouterEngine {
    /// Create a new router engine with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        for warning in config.warnings() {
            log::warn!("{}", warning);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            router: Arc::new(Router::new(config.snapshot())),
            event_handler: Arc::new(LoggingEventHandler),
            resolver: default_resolver(),
            system: Arc::new(ScriptSystemNetwork::new(config.system.clone())),
            shutdown_tx,
            state: RwLock::new(EngineState::Stopped),
            intercept: Mutex::new(None),
            config,
        })
    }

    /// Set a custom event handler
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Set a custom process resolver
    pub fn with_process_resolver(mut self, resolver: Arc<dyn ProcessResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set a custom OS integration
    pub fn with_system_network(mut self, system: Arc<dyn SystemNetwork>) -> Self {
        self.system = system;
        self
    }

    /// Configuration the engine was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Get the current state
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Number of intercepted TCP flows currently open
    pub fn active_flows(&self) -> usize {
        self.intercept_handle().map_or(0, |h| h.flows().len())
    }

    /// Get a handle that can be used to stop the engine from outside
    pub fn create_shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the router until shutdown
    ///
    /// Binds both listeners (a bind failure aborts the start), applies the
    /// system hooks, and serves traffic until [`stop`](Self::stop) or the
    /// shutdown handle fires. System settings are restored before this
    /// returns, whichever way it returns.
    pub async fn start(&self) -> Result<()> {
        let shutdown_rx = {
            let mut state = self.state.write().await;
            if *state != EngineState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            *state = EngineState::Starting;
            self.shutdown_tx.subscribe()
        };
        self.emit_event(EngineEvent::StateChanged {
            old: EngineState::Stopped,
            new: EngineState::Starting,
        })
        .await;

        let result = self.run(shutdown_rx).await;
        if let Err(e) = &result {
            self.emit_event(EngineEvent::Error { message: e.to_string() }).await;
        }

        self.set_state(EngineState::Stopped).await;
        result
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let (flow_tx, flow_rx) = mpsc::channel(FLOW_EVENT_BUFFER);
        self.spawn_event_forwarder(flow_rx);

        let intercept = InterceptProxy::bind(
            self.config.listen.http,
            self.router.clone(),
            self.resolver.clone(),
            Some(flow_tx.clone()),
        )
        .await?;
        let http_addr = intercept.local_addr()?;

        let dns = if self.config.listen.dns_enabled {
            Some(
                DnsProxy::bind(
                    self.config.listen.dns,
                    self.router.clone(),
                    self.config.dns_settings(),
                    Some(flow_tx.clone()),
                )
                .await?,
            )
        } else {
            None
        };
        let dns_addr = dns.as_ref().map(|d| d.local_addr()).transpose()?;
        drop(flow_tx);

        self.set_intercept_handle(Some(intercept.handle()));
        self.emit_event(EngineEvent::Listening {
            http: http_addr,
            dns: dns_addr,
        })
        .await;

        let mut http_task = tokio::spawn(intercept.run(self.shutdown_tx.subscribe()));
        let dns_task = dns.map(|d| tokio::spawn(d.run(self.shutdown_tx.subscribe())));

        let hooks = self.apply_system_hooks(http_addr, dns_addr).await;
        let mut http_joined = false;

        let result = match hooks {
            Ok(guard) => {
                self.set_state(EngineState::Running).await;

                let result = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        log::info!("Shutdown requested");
                        Ok(())
                    }
                    r = &mut http_task => {
                        log::warn!("Intercept proxy exited unexpectedly");
                        http_joined = true;
                        flatten_task(r)
                    }
                };

                self.set_state(EngineState::Stopping).await;
                self.restore_system_hooks(guard).await;
                result
            }
            Err(e) => {
                self.set_state(EngineState::Stopping).await;
                Err(e)
            }
        };

        // Listeners that are still running stop on this
        let _ = self.shutdown_tx.send(());
        if !http_joined {
            if let Err(e) = flatten_task(http_task.await) {
                log::warn!("Intercept proxy stopped with error: {}", e);
            }
        }
        if let Some(task) = dns_task {
            if let Err(e) = flatten_task(task.await) {
                log::warn!("DNS proxy stopped with error: {}", e);
            }
        }
        self.set_intercept_handle(None);

        result
    }

    /// Stop the router
    pub async fn stop(&self) -> Result<()> {
        if !self.state().await.is_active() {
            return Err(Error::NotRunning);
        }
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    /// Replace the routing rules and proxy list
    ///
    /// Listener addresses and DNS settings are not affected; they only
    /// change on restart. Every open TCP flow is torn down so its next
    /// connection is routed under the new rules. Returns the number of
    /// flows closed.
    pub async fn update_routing(&self, config: &Config) -> Result<usize> {
        validate_proxies(&config.proxies)?;
        for warning in routing_warnings(&config.routing, &config.proxies) {
            log::warn!("{}", warning);
        }

        let snapshot = config.snapshot();
        let flows_closed = match self.intercept_handle() {
            Some(handle) => handle.update_routing(snapshot),
            None => {
                self.router.update(snapshot);
                0
            }
        };

        self.emit_event(EngineEvent::RoutingUpdated { flows_closed }).await;
        Ok(flows_closed)
    }

    /// Probe every enabled upstream proxy concurrently
    ///
    /// Each probe opens a tunnel to the configured check target. Results are
    /// in proxy list order.
    pub async fn check_proxies(&self, timeout: Duration) -> Vec<ProxyCheck> {
        let snapshot = self.router.snapshot();
        let target = &self.config.check;

        let mut probes = JoinSet::new();
        for (index, proxy) in snapshot.proxies.iter().filter(|p| p.enabled).enumerate() {
            let proxy = proxy.clone();
            let host = target.target_host.clone();
            let port = target.target_port;
            probes.spawn(async move {
                let result = hop_socks::probe(&proxy, &host, port, timeout).await;
                (
                    index,
                    ProxyCheck {
                        endpoint: proxy.endpoint(),
                        id: proxy.id,
                        result,
                    },
                )
            });
        }

        let mut checks = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(check) => checks.push(check),
                Err(e) => log::error!("Proxy probe task failed: {}", e),
            }
        }
        checks.sort_by_key(|(index, _)| *index);
        checks.into_iter().map(|(_, check)| check).collect()
    }

    fn spawn_event_forwarder(&self, mut flow_rx: mpsc::Receiver<FlowEvent>) {
        let handler = self.event_handler.clone();
        tokio::spawn(async move {
            while let Some(event) = flow_rx.recv().await {
                handler.on_event(EngineEvent::Flow(event)).await;
            }
        });
    }

    async fn apply_system_hooks(&self, http: SocketAddr, dns: Option<SocketAddr>) -> Result<SystemGuard> {
        let mut guard = SystemGuard::new(self.system.clone());
        let (guard, result) = tokio::task::spawn_blocking(move || {
            let result = guard.enable_http_proxy(http).and_then(|()| match dns {
                Some(dns) => guard.enable_dns(dns),
                None => Ok(()),
            });
            (guard, result)
        })
        .await
        .map_err(|e| Error::Script(format!("system hook task failed: {}", e)))?;

        match result {
            Ok(()) => Ok(guard),
            Err(e) => {
                // Undo whatever half got applied
                tokio::task::spawn_blocking(move || drop(guard)).await.ok();
                Err(e)
            }
        }
    }

    async fn restore_system_hooks(&self, mut guard: SystemGuard) {
        if let Err(e) = tokio::task::spawn_blocking(move || guard.restore()).await {
            log::error!("System restore task failed: {}", e);
        }
    }

    fn intercept_handle(&self) -> Option<InterceptHandle> {
        self.intercept.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_intercept_handle(&self, handle: Option<InterceptHandle>) {
        *self.intercept.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    /// Update state and emit event
    async fn set_state(&self, new_state: EngineState) {
        let old_state = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, new_state)
        };

        if old_state != new_state {
            self.emit_event(EngineEvent::StateChanged {
                old: old_state,
                new: new_state,
            })
            .await;
        }
    }

    /// Emit an event to the handler
    async fn emit_event(&self, event: EngineEvent) {
        self.event_handler.on_event(event).await;
    }
}

fn flatten_task<E>(joined: std::result::Result<std::result::Result<(), E>, tokio::task::JoinError>) -> Result<()>
where
    Error: From<E>,
{
    match joined {
        Ok(result) => result.map_err(Error::from),
        Err(e) => Err(Error::Io(std::io::Error::other(e))),
    }
}

//! Engine lifecycle tests on loopback listeners

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hop_intercept::ProcessResolver;
use hop_rules::{FlowOutcome, ProxyKind, Transport, UpstreamProxy};
use ruroute_engine::{
    Config, EngineEvent, EngineState, Error, EventHandler, RouterEngine, SystemNetwork,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

struct ChannelHandler(mpsc::UnboundedSender<EngineEvent>);

#[async_trait::async_trait]
impl EventHandler for ChannelHandler {
    async fn on_event(&self, event: EngineEvent) {
        let _ = self.0.send(event);
    }
}

struct FixedApp(&'static str);

#[async_trait::async_trait]
impl ProcessResolver for FixedApp {
    async fn name_by_local_port(&self, _port: u16) -> String {
        self.0.to_string()
    }
}

#[derive(Default)]
struct RecordingSystem {
    calls: Mutex<Vec<String>>,
    fail_dns: bool,
}

impl RecordingSystem {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl SystemNetwork for RecordingSystem {
    fn set_http_proxy(&self, _addr: SocketAddr) -> ruroute_engine::Result<()> {
        self.record("set_http_proxy");
        Ok(())
    }

    fn restore_http_proxy(&self) -> ruroute_engine::Result<()> {
        self.record("restore_http_proxy");
        Ok(())
    }

    fn set_dns(&self, _addr: SocketAddr) -> ruroute_engine::Result<()> {
        if self.fail_dns {
            return Err(Error::Script("exit 1".into()));
        }
        self.record("set_dns");
        Ok(())
    }

    fn restore_dns(&self) -> ruroute_engine::Result<()> {
        self.record("restore_dns");
        Ok(())
    }
}

fn loopback_config() -> Config {
    let mut config = Config::default();
    config.listen.http = "127.0.0.1:0".parse().unwrap();
    config.listen.dns = "127.0.0.1:0".parse().unwrap();
    config
}

struct Harness {
    engine: Arc<RouterEngine>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    system: Arc<RecordingSystem>,
    task: tokio::task::JoinHandle<ruroute_engine::Result<()>>,
}

fn spawn_engine(config: Config, system: RecordingSystem) -> Harness {
    let (tx, events) = mpsc::unbounded_channel();
    let system = Arc::new(system);
    let engine = Arc::new(
        RouterEngine::new(config)
            .unwrap()
            .with_event_handler(Arc::new(ChannelHandler(tx)))
            .with_process_resolver(Arc::new(FixedApp("curl")))
            .with_system_network(system.clone()),
    );
    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    Harness {
        engine,
        events,
        system,
        task,
    }
}

impl Harness {
    async fn next_event<T>(&mut self, mut pick: impl FnMut(EngineEvent) -> Option<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if let Some(found) = pick(event) {
                    return found;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_for_state(&mut self, state: EngineState) {
        self.next_event(|e| match e {
            EngineEvent::StateChanged { new, .. } if new == state => Some(()),
            _ => None,
        })
        .await
    }

    async fn listening(&mut self) -> (SocketAddr, Option<SocketAddr>) {
        self.next_event(|e| match e {
            EngineEvent::Listening { http, dns } => Some((http, dns)),
            _ => None,
        })
        .await
    }
}

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

async fn open_tunnel(proxy: SocketAddr, target: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, target).as_bytes())
        .await
        .unwrap();
    let expected = b"HTTP/1.1 200 Connection Established\r\n\r\n";
    let mut reply = vec![0u8; expected.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, expected);
    client
}

#[tokio::test]
async fn test_lifecycle_routes_and_restores() {
    let echo = start_echo_server().await;
    let mut config = loopback_config();
    config.listen.dns_enabled = true;
    let mut h = spawn_engine(config, RecordingSystem::default());

    let (http, dns) = h.listening().await;
    assert!(dns.is_some());
    h.wait_for_state(EngineState::Running).await;
    assert_eq!(h.engine.state().await, EngineState::Running);
    assert_eq!(h.system.calls(), vec!["set_http_proxy", "set_dns"]);

    let mut client = open_tunnel(http, echo).await;
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let flow = h
        .next_event(|e| match e {
            EngineEvent::Flow(flow) => Some(flow),
            _ => None,
        })
        .await;
    assert_eq!(flow.app, "curl");
    assert_eq!(flow.transport, Transport::Tcp);
    assert_eq!(flow.outcome, FlowOutcome::Direct);
    assert_eq!(h.engine.active_flows(), 1);

    h.engine.stop().await.unwrap();
    h.task.await.unwrap().unwrap();

    assert_eq!(h.engine.state().await, EngineState::Stopped);
    assert_eq!(h.engine.active_flows(), 0);
    assert_eq!(
        h.system.calls(),
        vec!["set_http_proxy", "set_dns", "restore_dns", "restore_http_proxy"]
    );
}

#[tokio::test]
async fn test_routing_update_closes_flows() {
    let echo = start_echo_server().await;
    let mut h = spawn_engine(loopback_config(), RecordingSystem::default());
    let (http, _) = h.listening().await;
    h.wait_for_state(EngineState::Running).await;

    let _first = open_tunnel(http, echo).await;
    let _second = open_tunnel(http, echo).await;
    assert_eq!(h.engine.active_flows(), 2);

    let updated = Config::from_toml(
        r#"
[[routing.blacklist]]
hosts = ["127.0.0.1"]
action = "block"
"#,
    )
    .unwrap();
    assert_eq!(h.engine.update_routing(&updated).await.unwrap(), 2);
    assert_eq!(h.engine.active_flows(), 0);
    h.next_event(|e| match e {
        EngineEvent::RoutingUpdated { flows_closed } => Some(flows_closed),
        _ => None,
    })
    .await;

    // New flows see the new rules
    assert!(h.engine.router().resolve("curl", "127.0.0.1").is_blocked());

    h.engine.stop().await.unwrap();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let mut h = spawn_engine(loopback_config(), RecordingSystem::default());
    h.wait_for_state(EngineState::Running).await;

    assert!(matches!(h.engine.start().await, Err(Error::AlreadyRunning)));

    h.engine.create_shutdown_handle().send(()).unwrap();
    h.task.await.unwrap().unwrap();
    assert!(matches!(h.engine.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn test_bind_conflict_fails_start() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = loopback_config();
    config.listen.http = taken.local_addr().unwrap();

    let h = spawn_engine(config, RecordingSystem::default());
    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Bind { addr, .. } if addr == taken.local_addr().unwrap()));
    assert!(h.system.calls().is_empty());
    assert_eq!(h.engine.state().await, EngineState::Stopped);
}

#[tokio::test]
async fn test_failed_hook_restores_partial_setup() {
    let mut config = loopback_config();
    config.listen.dns_enabled = true;
    let h = spawn_engine(
        config,
        RecordingSystem {
            fail_dns: true,
            ..Default::default()
        },
    );

    let err = h.task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Script(_)));
    assert_eq!(h.system.calls(), vec!["set_http_proxy", "restore_http_proxy"]);
    assert_eq!(h.engine.state().await, EngineState::Stopped);
}

#[tokio::test]
async fn test_check_proxies() {
    // SOCKS5 server that grants one CONNECT
    let socks = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socks_port = socks.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = socks.accept().await.unwrap();
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();
        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    });

    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = loopback_config();
    config.check.target_host = "127.0.0.1".into();
    config.check.target_port = 80;
    let mut disabled = UpstreamProxy::new("off", ProxyKind::Http, "127.0.0.1", 1);
    disabled.enabled = false;
    config.proxies = vec![
        UpstreamProxy::new("good", ProxyKind::Socks5, "127.0.0.1", socks_port),
        disabled,
        UpstreamProxy::new("dead", ProxyKind::Http, "127.0.0.1", dead_port),
    ];

    let engine = RouterEngine::new(config).unwrap();
    let checks = engine.check_proxies(Duration::from_secs(2)).await;

    assert_eq!(checks.len(), 2);
    assert_eq!(checks[0].id, "good");
    assert!(checks[0].result.is_ok());
    assert_eq!(checks[1].id, "dead");
    assert_eq!(checks[1].endpoint, format!("127.0.0.1:{}", dead_port));
    assert!(checks[1].result.is_err());
}

#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[listen]
http = "127.0.0.1:18080"

[routing]
mode = "whitelist"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.listen.http, "127.0.0.1:18080".parse().unwrap());
    assert_eq!(config.routing.mode, hop_rules::RoutingMode::Whitelist);
}

#[test]
fn test_load_missing_file() {
    let err = Config::load("/nonexistent/ruroute.toml").unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

//! Tunnel setup through a configured upstream proxy

use std::time::{Duration, Instant};

use hop_rules::{ProxyKind, UpstreamProxy};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::{http, socks4, socks5};

/// Default bound on dialing an upstream plus its handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the handshake for `proxy`'s protocol over an already connected stream
pub async fn handshake<S>(stream: &mut S, proxy: &UpstreamProxy, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match proxy.kind {
        ProxyKind::Http => http::connect(stream, host, port, proxy.credentials()).await,
        ProxyKind::Socks4 => {
            let user_id = proxy.username.as_deref().unwrap_or_default();
            socks4::connect(stream, host, port, user_id).await
        }
        ProxyKind::Socks5 => socks5::connect(stream, host, port, proxy.credentials()).await,
    }
}

/// Dial `proxy` and open a tunnel to `host:port`
///
/// Dialing and the handshake together must finish within `timeout`.
pub async fn connect_via(proxy: &UpstreamProxy, host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect((proxy.address.trim_matches(|c| c == '[' || c == ']'), proxy.port)).await?;
        stream.set_nodelay(true)?;
        handshake(&mut stream, proxy, host, port).await?;
        Ok::<_, Error>(stream)
    })
    .await?
}

/// Measure how long a full tunnel setup through `proxy` takes
pub async fn probe(proxy: &UpstreamProxy, host: &str, port: u16, timeout: Duration) -> Result<Duration> {
    let started = Instant::now();
    let stream = connect_via(proxy, host, port, timeout).await?;
    let elapsed = started.elapsed();
    drop(stream);
    log::debug!("Probe of {} via {}:{} took {:?}", proxy, host, port, elapsed);
    Ok(elapsed)
}

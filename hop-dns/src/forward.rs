//! Query forwarding: direct UDP, tunneled TCP, or SOCKS5 UDP relay

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hop_rules::UpstreamProxy;
use hop_socks::UdpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{Error, Result};

/// Maximum DNS message size for UDP
pub const MAX_DNS_MESSAGE_SIZE: usize = 4096;

/// Send `query` to `resolver` over a fresh UDP socket and wait for one reply
pub async fn forward_direct(query: &[u8], resolver: SocketAddr, timeout: Duration) -> Result<Vec<u8>> {
    let local = match resolver {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(local).await?;
    // Connected, so stray datagrams from other peers are filtered out
    socket.connect(resolver).await?;

    tokio::time::timeout(timeout, socket.send(query)).await??;

    let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];
    let n = tokio::time::timeout(timeout, socket.recv(&mut buf)).await??;
    buf.truncate(n);
    Ok(buf)
}

/// Carry `query` to `resolver` through a TCP tunnel opened via `proxy`
///
/// Messages use DNS-over-TCP framing: a 2-byte big-endian length prefix.
pub async fn forward_tunneled(
    query: &[u8],
    proxy: &UpstreamProxy,
    resolver: SocketAddr,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let len = u16::try_from(query.len()).map_err(|_| Error::Dns("query too large for TCP framing".into()))?;
    let mut stream = hop_socks::connect_via(proxy, &resolver.ip().to_string(), resolver.port(), timeout).await?;

    tokio::time::timeout(timeout, exchange_framed(&mut stream, len, query)).await?
}

async fn exchange_framed(stream: &mut TcpStream, len: u16, query: &[u8]) -> Result<Vec<u8>> {
    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);
    stream.write_all(&framed).await?;

    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).await?;
    let mut reply = vec![0u8; u16::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}

/// Relay `query` to `resolver` through a SOCKS5 UDP association on `proxy`
pub async fn forward_socks5_udp(
    query: &[u8],
    proxy: &UpstreamProxy,
    resolver: SocketAddr,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let address = proxy.address.trim_start_matches('[').trim_end_matches(']');
    let control = tokio::time::timeout(timeout, TcpStream::connect((address, proxy.port))).await??;
    let session = tokio::time::timeout(timeout, UdpSession::open(control, proxy.credentials())).await??;

    session
        .send_to(query, &resolver.ip().to_string(), resolver.port())
        .await?;
    let (_, reply) = tokio::time::timeout(timeout, session.recv_from()).await??;
    session.close().await;
    Ok(reply)
}

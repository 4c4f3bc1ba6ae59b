//! SOCKS5 client (RFC 1928 subset)
//!
//! Supports:
//! - NO AUTH and USERNAME/PASSWORD (RFC 1929) methods
//! - CONNECT
//! - UDP ASSOCIATE, with [`UdpSession`] owning the control connection
//!
//! Every step reads an exact byte count; a short read is
//! [`Error::UnexpectedEndOfStream`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::addr::TargetAddr;
use crate::error::{Error, Result};
use crate::udp;

// SOCKS5 protocol constants.
pub const VERSION5: u8 = 0x05;
pub const AUTH_NONE: u8 = 0x00;
pub const AUTH_USER_PASS: u8 = 0x02;
pub const AUTH_NO_ACCEPT: u8 = 0xFF;
pub const AUTH_SUBNEG_VERSION: u8 = 0x01;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const REP_SUCCESS: u8 = 0x00;

/// Method selection offer, the same with or without credentials
const GREETING: [u8; 4] = [VERSION5, 2, AUTH_NONE, AUTH_USER_PASS];

/// Maximum UDP datagram handled by [`UdpSession`]
const MAX_DATAGRAM: usize = 65535;

/// Open a CONNECT tunnel to `host:port` over an established proxy stream
///
/// On success the stream is positioned right after the reply, ready to carry
/// application data.
pub async fn connect<S>(stream: &mut S, host: &str, port: u16, credentials: Option<(&str, &str)>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(stream, credentials).await?;
    let bound = request(stream, CMD_CONNECT, &TargetAddr::new(host, port)).await?;
    log::trace!("SOCKS5 CONNECT {}:{} bound at {}", host, port, bound);
    Ok(())
}

/// Ask the proxy for a UDP relay
///
/// Returns the relay endpoint reported by the server. The association lives
/// only as long as `stream` stays open.
pub async fn udp_associate<S>(stream: &mut S, credentials: Option<(&str, &str)>) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate(stream, credentials).await?;
    let unspecified = TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
    request(stream, CMD_UDP_ASSOCIATE, &unspecified).await
}

/// Method selection and optional username/password sub-negotiation
async fn negotiate<S>(stream: &mut S, credentials: Option<(&str, &str)>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&GREETING).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION5 {
        return Err(Error::ProtocolVersionMismatch {
            expected: VERSION5,
            actual: reply[0],
        });
    }

    match (reply[1], credentials) {
        (AUTH_NONE, _) => Ok(()),
        (AUTH_USER_PASS, Some((user, pass))) => authenticate(stream, user, pass).await,
        _ => Err(Error::NoAcceptableAuthMethod),
    }
}

async fn authenticate<S>(stream: &mut S, user: &str, pass: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if user.len() > u8::MAX as usize || pass.len() > u8::MAX as usize {
        return Err(Error::CredentialTooLong);
    }

    let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
    msg.push(AUTH_SUBNEG_VERSION);
    msg.push(user.len() as u8);
    msg.extend_from_slice(user.as_bytes());
    msg.push(pass.len() as u8);
    msg.extend_from_slice(pass.as_bytes());
    stream.write_all(&msg).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0 {
        return Err(Error::AuthenticationFailed(reply[1]));
    }
    Ok(())
}

/// Send `VER CMD RSV ATYP DST.ADDR DST.PORT` and parse the reply
///
/// Returns the bound address from the reply.
async fn request<S>(stream: &mut S, cmd: u8, target: &TargetAddr) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut req = Vec::with_capacity(3 + target.encoded_len());
    req.extend_from_slice(&[VERSION5, cmd, 0x00]);
    target.encode_into(&mut req)?;
    stream.write_all(&req).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION5 {
        return Err(Error::ProtocolVersionMismatch {
            expected: VERSION5,
            actual: header[0],
        });
    }
    if header[1] != REP_SUCCESS {
        return Err(Error::UpstreamConnectFailed(header[1]));
    }

    TargetAddr::read_from(stream, header[3]).await
}

/// A SOCKS5 UDP association
///
/// Owns the TCP control connection: dropping the session closes it, which
/// tells the proxy to tear down the relay.
pub struct UdpSession {
    control: TcpStream,
    socket: UdpSocket,
    relay: SocketAddr,
}

impl UdpSession {
    /// Run UDP ASSOCIATE over `control` and connect a local socket to the relay
    pub async fn open(mut control: TcpStream, credentials: Option<(&str, &str)>) -> Result<Self> {
        let relay = match udp_associate(&mut control, credentials).await? {
            TargetAddr::Ip(addr) => addr,
            TargetAddr::Domain(host, port) => tokio::net::lookup_host((host.as_str(), port))
                .await?
                .next()
                .ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no address for UDP relay {}", host),
                    ))
                })?,
        };

        // Servers commonly answer 0.0.0.0 meaning "the address you dialed"
        let relay = if relay.ip().is_unspecified() {
            SocketAddr::new(control.peer_addr()?.ip(), relay.port())
        } else {
            relay
        };

        let local = match relay {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(relay).await?;

        log::debug!("SOCKS5 UDP association established, relay {}", relay);
        Ok(Self {
            control,
            socket,
            relay,
        })
    }

    /// Relay endpoint datagrams are sent to
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay
    }

    /// Send `payload` to `host:port` through the relay
    pub async fn send_to(&self, payload: &[u8], host: &str, port: u16) -> Result<()> {
        let pkt = udp::pack(payload, host, port)?;
        self.socket.send(&pkt).await?;
        Ok(())
    }

    /// Receive the next well-formed datagram from the relay
    ///
    /// Malformed datagrams are skipped.
    pub async fn recv_from(&self) -> Result<(TargetAddr, Vec<u8>)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = self.socket.recv(&mut buf).await?;
            match udp::unpack(&buf[..n]) {
                Some((addr, payload)) => return Ok((addr, payload.to_vec())),
                None => log::debug!("dropping malformed SOCKS5 UDP datagram ({} bytes)", n),
            }
        }
    }

    /// Close the association
    pub async fn close(mut self) {
        let _ = self.control.shutdown().await;
    }
}

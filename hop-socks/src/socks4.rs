//! SOCKS4 client
//!
//! Request: `VN(4) CD(1) DSTPORT(2) DSTIP(4) USERID NUL`
//! Reply:   `VN(0) CD DSTPORT(2) DSTIP(4)` where CD 90 means granted.
//!
//! SOCKS4 carries IPv4 addresses only, so host names are resolved locally.

use std::net::{IpAddr, Ipv4Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const VERSION4: u8 = 0x04;
pub const CMD_CONNECT: u8 = 0x01;
pub const REPLY_GRANTED: u8 = 90;

/// Open a CONNECT tunnel to `host:port` over an established proxy stream
pub async fn connect<S>(stream: &mut S, host: &str, port: u16, user_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ip = resolve_ipv4(host, port).await?;

    let mut req = Vec::with_capacity(9 + user_id.len());
    req.push(VERSION4);
    req.push(CMD_CONNECT);
    req.extend_from_slice(&port.to_be_bytes());
    req.extend_from_slice(&ip.octets());
    req.extend_from_slice(user_id.as_bytes());
    req.push(0x00);
    stream.write_all(&req).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] != REPLY_GRANTED {
        return Err(Error::Socks4Rejected(reply[1]));
    }
    Ok(())
}

/// First IPv4 address for `host`
async fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => return Ok(ip),
        Ok(IpAddr::V6(_)) => return Err(Error::NoIPv4Resolution(host.to_string())),
        Err(_) => {}
    }

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| Error::NoIPv4Resolution(host.to_string()))?;
    addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::NoIPv4Resolution(host.to_string()))
}

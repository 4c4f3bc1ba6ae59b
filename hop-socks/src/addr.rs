//! SOCKS5 destination addresses
//!
//! Wire format: `ATYP DST.ADDR DST.PORT`, where ATYP selects a 4-byte IPv4
//! address, a 16-byte IPv6 address, or a length-prefixed domain name. The
//! port is big-endian.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// A destination as carried in SOCKS5 requests, replies and UDP headers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// IP literal and port
    Ip(SocketAddr),
    /// Domain name and port, resolved by the proxy
    Domain(String, u16),
}

impl TargetAddr {
    /// Build a target from a host string, preferring an IP literal
    ///
    /// Bracketed IPv6 literals (`[::1]`) are accepted.
    pub fn new(host: &str, port: u16) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
            Err(_) => TargetAddr::Domain(host.to_string(), port),
        }
    }

    /// Destination port
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Host part as a string
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(host, _) => host.clone(),
        }
    }

    /// Wire length of `ATYP DST.ADDR DST.PORT`
    pub fn encoded_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            TargetAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            TargetAddr::Domain(host, _) => 1 + 1 + host.len() + 2,
        }
    }

    /// Append `ATYP DST.ADDR DST.PORT` to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&addr.ip().octets());
            }
            TargetAddr::Domain(host, _) => {
                if host.len() > u8::MAX as usize {
                    return Err(Error::DomainTooLong);
                }
                buf.push(ATYP_DOMAIN);
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
            }
        }
        buf.extend_from_slice(&self.port().to_be_bytes());
        Ok(())
    }

    /// Read `DST.ADDR DST.PORT` for an already consumed `atyp` byte
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R, atyp: u8) -> Result<Self> {
        match atyp {
            ATYP_IPV4 => {
                let mut buf = [0u8; 6];
                r.read_exact(&mut buf).await?;
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
            }
            ATYP_IPV6 => {
                let mut buf = [0u8; 18];
                r.read_exact(&mut buf).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                r.read_exact(&mut len).await?;
                let len = len[0] as usize;
                let mut buf = vec![0u8; len + 2];
                r.read_exact(&mut buf).await?;
                let host = String::from_utf8_lossy(&buf[..len]).into_owned();
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok(TargetAddr::Domain(host, port))
            }
            other => Err(Error::UnsupportedAddressType(other)),
        }
    }

    /// Decode `ATYP DST.ADDR DST.PORT` from the front of `data`
    ///
    /// Returns the address and the number of bytes consumed, or `None` if
    /// the data is truncated or the address type is unknown.
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        let (&atyp, rest) = data.split_first()?;
        match atyp {
            ATYP_IPV4 => {
                let b = rest.get(..6)?;
                let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                let port = u16::from_be_bytes([b[4], b[5]]);
                Some((TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)), 7))
            }
            ATYP_IPV6 => {
                let b = rest.get(..18)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[..16]);
                let port = u16::from_be_bytes([b[16], b[17]]);
                Some((
                    TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)),
                    19,
                ))
            }
            ATYP_DOMAIN => {
                let len = *rest.first()? as usize;
                let b = rest.get(1..1 + len + 2)?;
                let host = String::from_utf8_lossy(&b[..len]).into_owned();
                let port = u16::from_be_bytes([b[len], b[len + 1]]);
                Some((TargetAddr::Domain(host, port), 1 + 1 + len + 2))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_prefers_ip_literal() {
        assert!(matches!(TargetAddr::new("93.184.216.34", 80), TargetAddr::Ip(SocketAddr::V4(_))));
        assert!(matches!(TargetAddr::new("::1", 80), TargetAddr::Ip(SocketAddr::V6(_))));
        assert!(matches!(TargetAddr::new("[::1]", 80), TargetAddr::Ip(SocketAddr::V6(_))));
        assert_eq!(
            TargetAddr::new("example.com", 443),
            TargetAddr::Domain("example.com".into(), 443)
        );
    }

    #[test]
    fn test_encode_ipv4() {
        let mut buf = Vec::new();
        TargetAddr::new("10.1.2.3", 8080).encode_into(&mut buf).unwrap();
        assert_eq!(buf, [ATYP_IPV4, 10, 1, 2, 3, 0x1F, 0x90]);
    }

    #[test]
    fn test_encode_domain() {
        let mut buf = Vec::new();
        let addr = TargetAddr::new("a.io", 53);
        addr.encode_into(&mut buf).unwrap();
        assert_eq!(buf, [ATYP_DOMAIN, 4, b'a', b'.', b'i', b'o', 0, 53]);
        assert_eq!(buf.len(), addr.encoded_len());
    }

    #[test]
    fn test_encode_rejects_long_domain() {
        let long = "a".repeat(256);
        let mut buf = Vec::new();
        assert!(matches!(
            TargetAddr::new(&long, 80).encode_into(&mut buf),
            Err(Error::DomainTooLong)
        ));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(TargetAddr::decode(&[]).is_none());
        assert!(TargetAddr::decode(&[ATYP_IPV4, 1, 2, 3]).is_none());
        assert!(TargetAddr::decode(&[ATYP_DOMAIN, 10, b'a']).is_none());
        assert!(TargetAddr::decode(&[0x09, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[tokio::test]
    async fn test_read_from_ipv6() {
        let addr = TargetAddr::new("2606:2800:220:1:248:1893:25c8:1946", 443);
        let mut buf = Vec::new();
        addr.encode_into(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf[1..].to_vec());
        let got = TargetAddr::read_from(&mut cursor, buf[0]).await.unwrap();
        assert_eq!(got, addr);
    }

    #[tokio::test]
    async fn test_read_from_short_input() {
        let mut cursor = std::io::Cursor::new(vec![127u8, 0]);
        let err = TargetAddr::read_from(&mut cursor, ATYP_IPV4).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream));
    }
}

//! Leading HTTP request parsing
//!
//! Only the request line and, for origin-form targets, the `Host` header are
//! inspected. The bytes themselves are replayed untouched to the destination.

use crate::error::{Error, Result};

/// Where the client wants to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method as sent
    pub method: String,
    /// Destination host without brackets
    pub host: String,
    /// Destination port
    pub port: u16,
    /// `CONNECT` request; nothing is forwarded until the tunnel is up
    pub tunnel: bool,
}

/// Parse the destination out of the first chunk a client sent
pub fn parse_request(buf: &[u8]) -> Result<RequestHead> {
    let text = String::from_utf8_lossy(buf);
    let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::Parse("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::Parse("missing method".into()))?;
    let target = parts
        .next()
        .ok_or_else(|| Error::Parse(format!("missing request target in {request_line:?}")))?;

    if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = split_host_port(target, 443)?;
        return Ok(RequestHead {
            method: method.to_string(),
            host,
            port,
            tunnel: true,
        });
    }

    let (host, port) = match absolute_authority(target) {
        Some((authority, default_port)) => split_host_port(authority, default_port)?,
        None => {
            let host = lines
                .take_while(|l| !l.is_empty())
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
                })
                .ok_or_else(|| Error::Parse("no Host header".into()))?;
            split_host_port(host, 80)?
        }
    };

    Ok(RequestHead {
        method: method.to_string(),
        host,
        port,
        tunnel: false,
    })
}

/// Authority part of an absolute-form target and its scheme's default port
fn absolute_authority(target: &str) -> Option<(&str, u16)> {
    let (scheme, rest) = target.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }
    let default_port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    // user:pass@host
    let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    Some((authority, default_port))
}

/// Split `host[:port]`, `[v6][:port]` or a bare IPv6 literal
fn split_host_port(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Parse(format!("unterminated IPv6 literal in {authority:?}")))?;
        (host, after.strip_prefix(':'))
    } else if authority.matches(':').count() == 1 {
        let (host, port) = authority.split_once(':').unwrap_or((authority, ""));
        (host, Some(port))
    } else {
        (authority, None)
    };

    if host.is_empty() {
        return Err(Error::Parse(format!("empty host in {authority:?}")));
    }
    let port = match port {
        Some(p) if !p.is_empty() => p
            .parse::<u16>()
            .map_err(|_| Error::Parse(format!("bad port in {authority:?}")))?,
        _ => default_port,
    };
    Ok((host.to_string(), port))
}

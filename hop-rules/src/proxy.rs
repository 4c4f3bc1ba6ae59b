//! Upstream proxy descriptions

use serde::{Deserialize, Serialize};

/// Protocol spoken by an upstream proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// HTTP proxy reached through `CONNECT` tunnels
    #[default]
    Http,
    /// SOCKS4 (IPv4 destinations only)
    Socks4,
    /// SOCKS5 (RFC 1928, no-auth and username/password)
    Socks5,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyKind::Http => write!(f, "http"),
            ProxyKind::Socks4 => write!(f, "socks4"),
            ProxyKind::Socks5 => write!(f, "socks5"),
        }
    }
}

/// An upstream proxy that traffic can be tunneled through
///
/// Values are snapshots: a flow that picked a proxy keeps its own copy, so
/// later configuration changes never alter a proxy that is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamProxy {
    /// Opaque identifier referenced by rules and the main proxy setting
    pub id: String,

    /// Host name or IP address of the proxy
    pub address: String,

    /// Proxy port
    pub port: u16,

    /// Optional username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Optional password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Protocol spoken by the proxy
    #[serde(default)]
    pub kind: ProxyKind,

    /// Disabled proxies are never selected
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl UpstreamProxy {
    /// Create an enabled proxy without credentials
    pub fn new(id: impl Into<String>, kind: ProxyKind, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            username: None,
            password: None,
            kind,
            enabled: true,
        }
    }

    /// Attach username/password credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Whether both a username and a password are configured
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.password),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }

    /// Username and password, if both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.has_credentials() {
            Some((self.username.as_deref()?, self.password.as_deref()?))
        } else {
            None
        }
    }

    /// `address:port`, with IPv6 literals bracketed
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl std::fmt::Display for UpstreamProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}://{})", self.id, self.kind, self.endpoint())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_both_parts() {
        let p = UpstreamProxy::new("p", ProxyKind::Socks5, "10.0.0.1", 1080);
        assert!(!p.has_credentials());
        assert!(p.credentials().is_none());

        let mut half = p.clone();
        half.username = Some("user".into());
        assert!(!half.has_credentials());

        let empty = p.clone().with_credentials("user", "");
        assert!(!empty.has_credentials());

        let full = p.with_credentials("user", "secret");
        assert_eq!(full.credentials(), Some(("user", "secret")));
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let v4 = UpstreamProxy::new("a", ProxyKind::Http, "127.0.0.1", 8080);
        assert_eq!(v4.endpoint(), "127.0.0.1:8080");

        let v6 = UpstreamProxy::new("b", ProxyKind::Http, "::1", 8080);
        assert_eq!(v6.endpoint(), "[::1]:8080");

        let name = UpstreamProxy::new("c", ProxyKind::Socks4, "proxy.example.com", 1080);
        assert_eq!(name.endpoint(), "proxy.example.com:1080");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ProxyKind::Http.to_string(), "http");
        assert_eq!(ProxyKind::Socks4.to_string(), "socks4");
        assert_eq!(ProxyKind::Socks5.to_string(), "socks5");
    }
}

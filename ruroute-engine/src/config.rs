//! Configuration types for the router engine

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use hop_dns::DnsSettings;
use hop_rules::{RoutingConfig, RoutingSnapshot, UpstreamProxy};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
///
/// # Example Configuration
///
/// ```toml
/// [listen]
/// http = "127.0.0.1:8080"
/// dns = "127.0.0.1:5353"
/// dns_enabled = true
///
/// [routing]
/// mode = "blacklist"
/// main_proxy = "office"
///
/// [[routing.blacklist]]
/// hosts = ["ads.example.com"]
/// action = "block"
///
/// [[proxies]]
/// id = "office"
/// kind = "socks5"
/// address = "10.0.0.1"
/// port = 1080
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub common: CommonConfig,

    /// Local listener addresses
    #[serde(default)]
    pub listen: ListenConfig,

    /// DNS forwarding settings
    #[serde(default)]
    pub dns: DnsConfig,

    /// OS integration hooks
    #[serde(default)]
    pub system: SystemConfig,

    /// Proxy connectivity check settings
    #[serde(default)]
    pub check: CheckConfig,

    /// Routing mode and rule lists
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Upstream proxies
    #[serde(default)]
    pub proxies: Vec<UpstreamProxy>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Rules that name unknown proxies are not errors: routing falls back to
    /// the main proxy or a direct connection. See [`Config::warnings`].
    pub fn validate(&self) -> Result<()> {
        match self.common.log_rotation.as_str() {
            "hourly" | "daily" | "never" => {}
            other => {
                return Err(Error::Config(format!(
                    "log_rotation must be \"hourly\", \"daily\" or \"never\", got \"{}\"",
                    other
                )))
            }
        }

        if self.dns.timeout_ms == 0 {
            return Err(Error::Config("dns.timeout_ms must be greater than 0".into()));
        }

        if self.check.timeout_ms == 0 {
            return Err(Error::Config("check.timeout_ms must be greater than 0".into()));
        }

        validate_proxies(&self.proxies)
    }

    /// Non-fatal problems worth telling the operator about
    pub fn warnings(&self) -> Vec<String> {
        routing_warnings(&self.routing, &self.proxies)
    }

    /// Routing snapshot for the listeners
    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot::new(self.routing.clone(), self.proxies.clone())
    }

    /// DNS proxy settings
    pub fn dns_settings(&self) -> DnsSettings {
        DnsSettings {
            fallback: self.dns.fallback,
            timeout: self.dns.timeout(),
            socks5_udp: self.dns.socks5_udp,
        }
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Ruroute Configuration

[common]
# Log level: "error", "warn", "info", "debug", "trace"
log_level = "info"

# Log file directory (optional)
# When set, logs are written to files in this directory with time-based rolling.
# If not set, logs are written to stdout only.
# log_file = "/var/log/ruroute"

# Log rotation period: "hourly", "daily", "never" (default: "daily")
# log_rotation = "daily"

# Local listeners
[listen]
# HTTP/HTTPS intercept proxy; point the system proxy here
http = "127.0.0.1:8080"

# DNS redirect proxy; point the system resolver here
dns = "127.0.0.1:5353"

# Run the DNS proxy (default: false)
dns_enabled = false

[dns]
# Resolver that receives every forwarded query
fallback = "8.8.8.8:53"

# Send/receive timeout in milliseconds
timeout_ms = 2000

# Relay queries for SOCKS5 upstreams over UDP ASSOCIATE instead of a TCP tunnel
socks5_udp = false

# OS integration hooks (optional)
# Each command runs through the shell. The set_* commands receive the local
# listener address as their only argument. Restore commands also run when
# the router exits abnormally.
[system]
# set_http_proxy = "/usr/local/bin/proxy-on.sh"
# restore_http_proxy = "/usr/local/bin/proxy-off.sh"
# set_dns = "/usr/local/bin/dns-on.sh"
# restore_dns = "/usr/local/bin/dns-off.sh"

# Proxy connectivity check (`ruroute check`)
[check]
target_host = "www.gstatic.com"
target_port = 80
timeout_ms = 5000

[routing]
# "blacklist": everything goes through main_proxy unless a rule says otherwise
# "whitelist": everything goes direct unless a rule says otherwise
mode = "blacklist"

# Primary upstream proxy id
# main_proxy = "office"

# Rules are checked in order; the first enabled match wins.
# apps: process names ("*" or empty = any); hosts: substrings ("*" or empty = any)
# action: "proxy", "block" or "direct"; proxy: optional upstream id override
[[routing.blacklist]]
apps = ["*"]
hosts = ["ads.example.com"]
action = "block"

[[routing.whitelist]]
apps = ["firefox", "chrome.exe"]
action = "proxy"

# Upstream proxies
# kind: "http", "socks4" or "socks5"
# [[proxies]]
# id = "office"
# kind = "socks5"
# address = "10.0.0.1"
# port = 1080
# username = "user"
# password = "secret"
# enabled = true
"#
        .to_string()
    }
}

/// Structural checks on the proxy list
pub fn validate_proxies(proxies: &[UpstreamProxy]) -> Result<()> {
    let mut ids = HashSet::new();
    for proxy in proxies {
        if proxy.id.is_empty() {
            return Err(Error::Config("proxy id must not be empty".into()));
        }
        if !ids.insert(proxy.id.as_str()) {
            return Err(Error::Config(format!("duplicate proxy id \"{}\"", proxy.id)));
        }
        if proxy.address.is_empty() {
            return Err(Error::Config(format!("proxy \"{}\" has no address", proxy.id)));
        }
        if proxy.port == 0 {
            return Err(Error::Config(format!("proxy \"{}\" has port 0", proxy.id)));
        }
    }
    Ok(())
}

/// Dangling or disabled proxy references in the routing rules
pub fn routing_warnings(routing: &RoutingConfig, proxies: &[UpstreamProxy]) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut check = |what: String, id: &str| match proxies.iter().find(|p| p.id == id) {
        None => warnings.push(format!("{} refers to unknown proxy \"{}\"", what, id)),
        Some(p) if !p.enabled => warnings.push(format!("{} refers to disabled proxy \"{}\"", what, id)),
        Some(_) => {}
    };

    if let Some(id) = &routing.main_proxy {
        check("main_proxy".to_string(), id);
    }
    for (name, rules) in [("blacklist", &routing.blacklist), ("whitelist", &routing.whitelist)] {
        for (i, rule) in rules.iter().enumerate() {
            if let Some(id) = &rule.proxy {
                check(format!("{} rule {}", name, i + 1), id);
            }
        }
    }
    warnings
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log file directory (optional)
    ///
    /// When set, logs are written to files in this directory with time-based
    /// rolling. If not set, logs are written to stdout only.
    #[serde(default)]
    pub log_file: Option<String>,

    /// Log rotation period: "hourly", "daily" or "never"
    #[serde(default = "default_log_rotation")]
    pub log_rotation: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            log_rotation: default_log_rotation(),
        }
    }
}

/// Local listener addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// HTTP/HTTPS intercept proxy
    #[serde(default = "default_http_listen")]
    pub http: SocketAddr,

    /// DNS redirect proxy
    #[serde(default = "default_dns_listen")]
    pub dns: SocketAddr,

    /// Whether to run the DNS proxy
    #[serde(default)]
    pub dns_enabled: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            http: default_http_listen(),
            dns: default_dns_listen(),
            dns_enabled: false,
        }
    }
}

/// DNS forwarding settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Resolver every query is sent to
    #[serde(default = "default_dns_fallback")]
    pub fallback: SocketAddr,

    /// Send/receive timeout in milliseconds
    #[serde(default = "default_dns_timeout_ms")]
    pub timeout_ms: u64,

    /// Use UDP ASSOCIATE for SOCKS5 upstreams
    #[serde(default)]
    pub socks5_udp: bool,
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            fallback: default_dns_fallback(),
            timeout_ms: default_dns_timeout_ms(),
            socks5_udp: false,
        }
    }
}

/// Shell commands that switch the OS to and from the local listeners
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_dns: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_dns: Option<String>,
}

impl SystemConfig {
    /// Whether any hook is configured
    pub fn is_empty(&self) -> bool {
        self.set_http_proxy.is_none()
            && self.restore_http_proxy.is_none()
            && self.set_dns.is_none()
            && self.restore_dns.is_none()
    }
}

/// Proxy connectivity check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Host the probe tunnels to
    #[serde(default = "default_check_host")]
    pub target_host: String,

    /// Port the probe tunnels to
    #[serde(default = "default_check_port")]
    pub target_port: u16,

    /// Per-proxy timeout in milliseconds
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            target_host: default_check_host(),
            target_port: default_check_port(),
            timeout_ms: default_check_timeout_ms(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_dns_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5353))
}

fn default_dns_fallback() -> SocketAddr {
    SocketAddr::from(([8, 8, 8, 8], 53))
}

fn default_dns_timeout_ms() -> u64 {
    2000
}

fn default_check_host() -> String {
    "www.gstatic.com".to_string()
}

fn default_check_port() -> u16 {
    80
}

fn default_check_timeout_ms() -> u64 {
    5000
}

//! Routing rules and configuration

use serde::{Deserialize, Serialize};

/// Pattern that matches every app or host
pub const WILDCARD: &str = "*";

/// What to do with a flow that matched a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Tunnel through an upstream proxy
    Proxy,
    /// Drop the flow
    Block,
    /// Connect to the destination without a proxy
    Direct,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Proxy => write!(f, "proxy"),
            RuleAction::Block => write!(f, "block"),
            RuleAction::Direct => write!(f, "direct"),
        }
    }
}

/// Which rule list drives routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Everything goes through the main proxy unless a rule says otherwise
    #[default]
    Blacklist,
    /// Everything goes direct unless a rule says otherwise
    Whitelist,
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingMode::Blacklist => write!(f, "blacklist"),
            RoutingMode::Whitelist => write!(f, "whitelist"),
        }
    }
}

/// A single routing rule
///
/// Empty pattern lists and the `*` pattern match anything. App patterns are
/// compared case-insensitively against the owning process name; host
/// patterns match when they are a case-insensitive substring of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Disabled rules are skipped
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Process name patterns
    #[serde(default)]
    pub apps: Vec<String>,

    /// Destination host patterns
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Action taken on match
    pub action: RuleAction,

    /// Upstream proxy id overriding the main proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Rule {
    /// Create an enabled rule
    pub fn new<A, H>(apps: A, hosts: H, action: RuleAction) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        H: IntoIterator,
        H::Item: Into<String>,
    {
        Self {
            enabled: true,
            apps: apps.into_iter().map(Into::into).collect(),
            hosts: hosts.into_iter().map(Into::into).collect(),
            action,
            proxy: None,
        }
    }

    /// Route matches through a specific proxy
    pub fn via(mut self, proxy_id: impl Into<String>) -> Self {
        self.proxy = Some(proxy_id.into());
        self
    }

    /// Mark the rule as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the rule's app patterns accept `app`
    pub fn matches_app(&self, app: &str) -> bool {
        self.apps.is_empty() || self.apps.iter().any(|p| app_matches(p, app))
    }

    /// Whether the rule's host patterns accept `host`
    pub fn matches_host(&self, host: &str) -> bool {
        self.hosts.is_empty() || self.hosts.iter().any(|p| host_matches(p, host))
    }

    /// Whether the rule applies to a TCP flow from `app` to `host`
    pub fn matches(&self, app: &str, host: &str) -> bool {
        self.enabled && self.matches_app(app) && self.matches_host(host)
    }
}

/// Routing configuration: the mode, the main proxy and both rule lists
///
/// Both lists persist across mode switches; only the active one is consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Active mode
    #[serde(default)]
    pub mode: RoutingMode,

    /// Proxy used when no more specific rule applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_proxy: Option<String>,

    /// Rules consulted in blacklist mode, in evaluation order
    #[serde(default)]
    pub blacklist: Vec<Rule>,

    /// Rules consulted in whitelist mode, in evaluation order
    #[serde(default)]
    pub whitelist: Vec<Rule>,
}

impl RoutingConfig {
    /// Rule list for the active mode
    pub fn active_rules(&self) -> &[Rule] {
        match self.mode {
            RoutingMode::Blacklist => &self.blacklist,
            RoutingMode::Whitelist => &self.whitelist,
        }
    }

    /// Every rule in both lists
    pub fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.blacklist.iter().chain(self.whitelist.iter())
    }
}

fn app_matches(pattern: &str, app: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    if pattern.eq_ignore_ascii_case(app) {
        return true;
    }
    // "chrome" and "chrome.exe" name the same program
    strip_exe(pattern).eq_ignore_ascii_case(strip_exe(app))
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    if pattern.is_empty() {
        return false;
    }
    host.to_ascii_lowercase()
        .contains(&pattern.to_ascii_lowercase())
}

fn strip_exe(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

fn default_true() -> bool {
    true
}

//! Rule resolution
//!
//! Turns (app, host) into a routing [`Decision`] against one configuration
//! snapshot. Resolution is pure and never fails: a missing or disabled proxy
//! degrades the decision to [`RuleAction::Direct`] instead of blocking.

use crate::proxy::UpstreamProxy;
use crate::rule::{RoutingConfig, RoutingMode, Rule, RuleAction};

/// Outcome of rule resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// What to do with the flow
    pub action: RuleAction,
    /// Proxy to tunnel through; `Some` exactly when `action` is `Proxy`
    pub proxy: Option<UpstreamProxy>,
}

impl Decision {
    /// Connect without a proxy
    pub fn direct() -> Self {
        Self {
            action: RuleAction::Direct,
            proxy: None,
        }
    }

    /// Drop the flow
    pub fn block() -> Self {
        Self {
            action: RuleAction::Block,
            proxy: None,
        }
    }

    /// Tunnel through `proxy`
    pub fn proxy(proxy: UpstreamProxy) -> Self {
        Self {
            action: RuleAction::Proxy,
            proxy: Some(proxy),
        }
    }

    /// Whether the flow must be dropped
    pub fn is_blocked(&self) -> bool {
        self.action == RuleAction::Block
    }

    /// Proxy to tunnel through, if any
    pub fn upstream(&self) -> Option<&UpstreamProxy> {
        self.proxy.as_ref()
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.proxy {
            Some(p) => write!(f, "proxy via {}", p),
            None => write!(f, "{}", self.action),
        }
    }
}

/// Resolve the routing decision for a TCP flow owned by `app` towards `host`
pub fn resolve(app: &str, host: &str, config: &RoutingConfig, proxies: &[UpstreamProxy]) -> Decision {
    resolve_with(config, proxies, |rule| rule.matches(app, host))
}

/// Resolve the routing decision for a DNS query
///
/// DNS traffic carries no process identity, so only host patterns apply.
pub fn resolve_host(host: &str, config: &RoutingConfig, proxies: &[UpstreamProxy]) -> Decision {
    resolve_with(config, proxies, |rule| rule.enabled && rule.matches_host(host))
}

fn resolve_with<F>(config: &RoutingConfig, proxies: &[UpstreamProxy], matcher: F) -> Decision
where
    F: Fn(&Rule) -> bool,
{
    // The main proxy is shared by both modes as the single primary upstream
    let main = config
        .main_proxy
        .as_deref()
        .and_then(|id| find_enabled(proxies, id));

    let fallback = || match main {
        Some(p) => Decision::proxy(p.clone()),
        None => Decision::direct(),
    };

    let Some(rule) = config.active_rules().iter().find(|r| matcher(r)) else {
        return match config.mode {
            RoutingMode::Blacklist => fallback(),
            RoutingMode::Whitelist => Decision::direct(),
        };
    };

    match rule.action {
        RuleAction::Block => Decision::block(),
        RuleAction::Direct => Decision::direct(),
        RuleAction::Proxy => match rule.proxy.as_deref().and_then(|id| find_enabled(proxies, id)) {
            Some(explicit) => Decision::proxy(explicit.clone()),
            None => fallback(),
        },
    }
}

fn find_enabled<'a>(proxies: &'a [UpstreamProxy], id: &str) -> Option<&'a UpstreamProxy> {
    proxies.iter().find(|p| p.enabled && p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;

    fn proxies() -> Vec<UpstreamProxy> {
        let mut off = UpstreamProxy::new("off", ProxyKind::Socks5, "10.0.0.3", 1080);
        off.enabled = false;
        vec![
            UpstreamProxy::new("main", ProxyKind::Http, "10.0.0.1", 8080),
            UpstreamProxy::new("alt", ProxyKind::Socks5, "10.0.0.2", 1080),
            off,
        ]
    }

    fn blacklist(rules: Vec<Rule>) -> RoutingConfig {
        RoutingConfig {
            mode: RoutingMode::Blacklist,
            main_proxy: Some("main".into()),
            blacklist: rules,
            whitelist: Vec::new(),
        }
    }

    fn whitelist(rules: Vec<Rule>) -> RoutingConfig {
        RoutingConfig {
            mode: RoutingMode::Whitelist,
            main_proxy: Some("main".into()),
            blacklist: Vec::new(),
            whitelist: rules,
        }
    }

    #[test]
    fn test_blacklist_block_rule_beats_main_proxy() {
        let config = blacklist(vec![Rule::new(["*"], ["ads.example.com"], RuleAction::Block)]);
        let proxies = proxies();

        let blocked = resolve("chrome.exe", "ads.example.com", &config, &proxies);
        assert_eq!(blocked, Decision::block());

        let other = resolve("chrome.exe", "other.com", &config, &proxies);
        assert_eq!(other.action, RuleAction::Proxy);
        assert_eq!(other.proxy.unwrap().id, "main");
    }

    #[test]
    fn test_blacklist_without_main_is_direct() {
        let mut config = blacklist(Vec::new());
        config.main_proxy = None;
        assert_eq!(resolve("a", "b", &config, &proxies()), Decision::direct());
    }

    #[test]
    fn test_disabled_main_fails_open() {
        let mut config = blacklist(vec![Rule::new(["*"], ["x.com"], RuleAction::Proxy)]);
        config.main_proxy = Some("off".into());
        let proxies = proxies();

        assert_eq!(resolve("a", "x.com", &config, &proxies), Decision::direct());
        assert_eq!(resolve("a", "y.com", &config, &proxies), Decision::direct());
    }

    #[test]
    fn test_unknown_main_id_fails_open() {
        let mut config = blacklist(Vec::new());
        config.main_proxy = Some("missing".into());
        assert_eq!(resolve("a", "b", &config, &proxies()), Decision::direct());
    }

    #[test]
    fn test_explicit_proxy_overrides_main() {
        let config = blacklist(vec![Rule::new(["curl"], ["*"], RuleAction::Proxy).via("alt")]);
        let d = resolve("curl", "example.com", &config, &proxies());
        assert_eq!(d.proxy.unwrap().id, "alt");
    }

    #[test]
    fn test_disabled_explicit_proxy_falls_back_to_main() {
        let config = blacklist(vec![Rule::new(["curl"], ["*"], RuleAction::Proxy).via("off")]);
        let d = resolve("curl", "example.com", &config, &proxies());
        assert_eq!(d.proxy.unwrap().id, "main");
    }

    #[test]
    fn test_first_enabled_match_wins() {
        let config = blacklist(vec![
            Rule::new(["*"], ["example.com"], RuleAction::Block).disabled(),
            Rule::new(["*"], ["example.com"], RuleAction::Direct),
            Rule::new(["*"], ["example.com"], RuleAction::Block),
        ]);
        assert_eq!(resolve("a", "www.example.com", &config, &proxies()), Decision::direct());
    }

    #[test]
    fn test_whitelist_unmatched_is_direct() {
        let config = whitelist(vec![Rule::new(["chrome.exe"], ["*"], RuleAction::Proxy)]);
        assert_eq!(resolve("firefox", "example.com", &config, &proxies()), Decision::direct());
    }

    #[test]
    fn test_whitelist_match_uses_main_proxy() {
        let config = whitelist(vec![Rule::new(["chrome.exe"], ["*"], RuleAction::Proxy)]);
        let d = resolve("chrome.exe", "example.com", &config, &proxies());
        assert_eq!(d.proxy.unwrap().id, "main");
    }

    #[test]
    fn test_whitelist_match_without_main_is_direct() {
        let mut config = whitelist(vec![Rule::new(["chrome.exe"], ["*"], RuleAction::Proxy)]);
        config.main_proxy = None;
        assert_eq!(resolve("chrome.exe", "a.com", &config, &proxies()), Decision::direct());
    }

    #[test]
    fn test_whitelist_block_is_terminal() {
        let config = whitelist(vec![
            Rule::new(["*"], ["tracker"], RuleAction::Block),
            Rule::new(["*"], ["*"], RuleAction::Proxy),
        ]);
        assert!(resolve("a", "tracker.net", &config, &proxies()).is_blocked());
    }

    #[test]
    fn test_mode_switch_keeps_both_lists() {
        let mut config = blacklist(vec![Rule::new(["*"], ["a.com"], RuleAction::Block)]);
        config.whitelist = vec![Rule::new(["*"], ["b.com"], RuleAction::Proxy).via("alt")];
        let proxies = proxies();

        assert!(resolve("x", "a.com", &config, &proxies).is_blocked());
        config.mode = RoutingMode::Whitelist;
        assert_eq!(resolve("x", "a.com", &config, &proxies), Decision::direct());
        assert_eq!(resolve("x", "b.com", &config, &proxies).proxy.unwrap().id, "alt");
        config.mode = RoutingMode::Blacklist;
        assert!(resolve("x", "a.com", &config, &proxies).is_blocked());
    }

    #[test]
    fn test_resolve_host_ignores_app_patterns() {
        let config = blacklist(vec![Rule::new(["chrome.exe"], ["ads."], RuleAction::Block)]);
        let proxies = proxies();

        assert!(resolve_host("ads.example.com", &config, &proxies).is_blocked());
        // The TCP path still requires the app to match
        assert!(!resolve("curl", "ads.example.com", &config, &proxies).is_blocked());
    }

    #[test]
    fn test_resolve_host_skips_disabled_rules() {
        let config = blacklist(vec![Rule::new(["*"], ["ads."], RuleAction::Block).disabled()]);
        let d = resolve_host("ads.example.com", &config, &proxies());
        assert_eq!(d.proxy.unwrap().id, "main");
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::direct().to_string(), "direct");
        assert_eq!(Decision::block().to_string(), "block");
        let p = UpstreamProxy::new("main", ProxyKind::Http, "10.0.0.1", 8080);
        assert_eq!(
            Decision::proxy(p).to_string(),
            "proxy via main (http://10.0.0.1:8080)"
        );
    }
}

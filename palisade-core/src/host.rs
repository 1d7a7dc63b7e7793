// Host to site resolution

use crate::table::OverridePolicy;
use std::collections::HashMap;

/// Lower-case a host and strip scheme, path and port.
///
/// Bracketed IPv6 literals keep their brackets and lose the port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_lowercase();
    let host = host
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&host);
    let host = host.split(['/', '?', '#']).next().unwrap_or_default();

    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((addr, _)) => format!("[{addr}]"),
            None => host.to_string(),
        };
    }

    host.split(':').next().unwrap_or_default().to_string()
}

/// Normalized host (or `*.suffix` wildcard) to site name.
#[derive(Debug, Clone, Default)]
pub struct HostTable {
    hosts: HashMap<String, String>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `host` to `site`; returns whether the entry was stored.
    pub fn insert(&mut self, host: &str, site: &str, policy: OverridePolicy) -> bool {
        let host = normalize_host(host);
        if host.is_empty() {
            return false;
        }
        if policy == OverridePolicy::FirstWins && self.hosts.contains_key(&host) {
            return false;
        }
        self.hosts.insert(host, site.to_string());
        true
    }

    /// Exact host first, then `*.suffix` entries from the longest suffix down.
    pub fn resolve(&self, host: &str) -> Option<&str> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }
        if let Some(site) = self.hosts.get(&host) {
            return Some(site);
        }

        let mut rest = host.as_str();
        while let Some((_, suffix)) = rest.split_once('.') {
            if let Some(site) = self.hosts.get(&format!("*.{suffix}")) {
                return Some(site);
            }
            rest = suffix;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("HTTPS://A.Example.com:8443/path"), "a.example.com");
        assert_eq!(normalize_host("api.test:80"), "api.test");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host(""), "");
    }

    #[test]
    fn test_exact_before_wildcard() {
        let mut table = HostTable::new();
        table.insert("*.example.com", "tenant", OverridePolicy::FirstWins);
        table.insert("a.example.com", "alpha", OverridePolicy::FirstWins);

        assert_eq!(table.resolve("a.example.com"), Some("alpha"));
        assert_eq!(table.resolve("b.example.com:8080"), Some("tenant"));
        assert_eq!(table.resolve("x.y.example.com"), Some("tenant"));
        assert_eq!(table.resolve("other.test"), None);
    }

    #[test]
    fn test_longest_wildcard_wins() {
        let mut table = HostTable::new();
        table.insert("*.example.com", "outer", OverridePolicy::FirstWins);
        table.insert("*.eu.example.com", "inner", OverridePolicy::FirstWins);
        assert_eq!(table.resolve("shop.eu.example.com"), Some("inner"));
    }

    #[test]
    fn test_policy() {
        let mut table = HostTable::new();
        assert!(table.insert("a.test", "one", OverridePolicy::FirstWins));
        assert!(!table.insert("A.TEST", "two", OverridePolicy::FirstWins));
        assert_eq!(table.resolve("a.test"), Some("one"));

        assert!(table.insert("a.test", "two", OverridePolicy::OverrideWins));
        assert_eq!(table.resolve("a.test"), Some("two"));
    }
}

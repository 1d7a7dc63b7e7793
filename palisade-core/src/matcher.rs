// Host-aware path matching for the default connector

use crate::host::normalize_host;
use crate::value::{Map, Value};
use crate::{Error, Result};
use http::Method;
use matchit::Router;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone)]
struct Binding {
    method: Option<Method>,
    name: String,
}

/// One matchit tree. Identical templates share a slot; the slot keeps every
/// binding in registration order.
#[derive(Default)]
struct PathTable {
    router: Router<usize>,
    templates: HashMap<String, usize>,
    slots: Vec<Vec<Binding>>,
}

impl PathTable {
    fn insert(&mut self, uri: &str, binding: Binding) -> Result<()> {
        if let Some(&slot) = self.templates.get(uri) {
            self.slots[slot].push(binding);
            return Ok(());
        }

        let slot = self.slots.len();
        self.router
            .insert(uri, slot)
            .map_err(|err| Error::Route(format!("{uri}: {err}")))?;
        self.templates.insert(uri.to_string(), slot);
        self.slots.push(vec![binding]);
        Ok(())
    }

    fn at(&self, method: &Method, path: &str) -> Option<Matched> {
        let matched = self.router.at(path).ok()?;
        let bindings = self.slots.get(*matched.value)?;

        // A preflight takes any binding of the path so the crossing stage
        // can answer it.
        let binding = bindings
            .iter()
            .find(|b| b.method.as_ref() == Some(method))
            .or_else(|| bindings.iter().find(|b| b.method.is_none()))
            .or_else(|| bindings.first().filter(|_| *method == Method::OPTIONS))?;

        let params = matched
            .params
            .iter()
            .map(|(key, value)| (key.to_string(), Value::String(decode(value))))
            .collect();

        Some(Matched {
            name: binding.name.clone(),
            params,
        })
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// A matched binding and its captured path parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub name: String,
    pub params: Map,
}

/// Route bindings keyed by host, plus the bindings that answer any host.
#[derive(Default)]
pub struct RouteMatcher {
    hosts: HashMap<String, PathTable>,
    any: PathTable,
}

impl RouteMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `method` (`None` for any) and `uri` under every host,
    /// or under any host when `hosts` is empty.
    pub fn insert(&mut self, name: &str, method: Option<Method>, uri: &str, hosts: &[String]) -> Result<()> {
        let binding = Binding {
            method,
            name: name.to_string(),
        };

        let hosts: Vec<String> = hosts
            .iter()
            .map(|h| normalize_host(h))
            .filter(|h| !h.is_empty())
            .collect();

        if hosts.is_empty() {
            return self.any.insert(uri, binding).inspect_err(|err| {
                warn!(name, uri, error = %err, "Route binding rejected");
            });
        }

        for host in hosts {
            self.hosts
                .entry(host)
                .or_default()
                .insert(uri, binding.clone())
                .inspect_err(|err| warn!(name, uri, error = %err, "Route binding rejected"))?;
        }
        Ok(())
    }

    /// Exact host, then `*.suffix` hosts from the longest suffix down, then
    /// the host-independent bindings.
    pub fn at(&self, host: &str, method: &Method, path: &str) -> Option<Matched> {
        let host = normalize_host(host);

        if let Some(matched) = self.hosts.get(&host).and_then(|t| t.at(method, path)) {
            return Some(matched);
        }

        let mut rest = host.as_str();
        while let Some((_, suffix)) = rest.split_once('.') {
            let wildcard = format!("*.{suffix}");
            if let Some(matched) = self.hosts.get(&wildcard).and_then(|t| t.at(method, path)) {
                return Some(matched);
            }
            rest = suffix;
        }

        self.any.at(method, path)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.any.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_method_and_wildcard_bindings() {
        let mut matcher = RouteMatcher::new();
        matcher
            .insert("default.user.get", Some(Method::GET), "/users/{id}", &[])
            .unwrap();
        matcher
            .insert("default.user.*", None, "/users/{id}", &[])
            .unwrap();

        let get = matcher.at("example.com", &Method::GET, "/users/42").unwrap();
        assert_eq!(get.name, "default.user.get");
        assert_eq!(get.params.get("id"), Some(&Value::String("42".into())));

        let delete = matcher.at("example.com", &Method::DELETE, "/users/42").unwrap();
        assert_eq!(delete.name, "default.user.*");
    }

    #[test]
    fn test_method_without_fallback_misses() {
        let mut matcher = RouteMatcher::new();
        matcher
            .insert("default.login.post", Some(Method::POST), "/login", &[])
            .unwrap();
        assert!(matcher.at("", &Method::GET, "/login").is_none());
        assert!(matcher.at("", &Method::POST, "/missing").is_none());
    }

    #[test]
    fn test_options_takes_any_binding() {
        let mut matcher = RouteMatcher::new();
        matcher
            .insert("default.login.post", Some(Method::POST), "/login", &[])
            .unwrap();
        let preflight = matcher.at("", &Method::OPTIONS, "/login").unwrap();
        assert_eq!(preflight.name, "default.login.post");
        assert!(matcher.at("", &Method::OPTIONS, "/missing").is_none());
    }

    #[test]
    fn test_host_bindings() {
        let mut matcher = RouteMatcher::new();
        matcher
            .insert("blog.home.*", None, "/", &hosts(&["blog.example.com"]))
            .unwrap();
        matcher
            .insert("tenant.home.*", None, "/", &hosts(&["*.example.com"]))
            .unwrap();
        matcher.insert("default.home.*", None, "/", &[]).unwrap();

        let at = |host: &str| matcher.at(host, &Method::GET, "/").unwrap().name;
        assert_eq!(at("Blog.Example.com:8080"), "blog.home.*");
        assert_eq!(at("acme.example.com"), "tenant.home.*");
        assert_eq!(at("other.test"), "default.home.*");
    }

    #[test]
    fn test_params_are_decoded() {
        let mut matcher = RouteMatcher::new();
        matcher.insert("default.file.*", None, "/files/{*path}", &[]).unwrap();
        let matched = matcher.at("", &Method::GET, "/files/a%20b/c.txt").unwrap();
        assert_eq!(matched.params.get("path"), Some(&Value::String("a b/c.txt".into())));
    }

    #[test]
    fn test_conflicting_templates_rejected() {
        let mut matcher = RouteMatcher::new();
        matcher.insert("a", None, "/users/{id}", &[]).unwrap();
        assert!(matcher.insert("b", None, "/users/{name}", &[]).is_err());
    }
}

//! Reverse URL builder.
//!
//! Inverts a site's route table: a dotted route name plus a value map gives
//! back a path, or an absolute URL when the target is another site.
//!
//! Keys in the value map are split by syntax:
//!
//! ```text
//! {id}      path parameter, substituted into the URI template
//! [site]    directive: build an absolute URL (true, or a site name)
//! [ssl]     directive: https / wss
//! [socket]  directive: ws / wss
//! tab       anything else is a query value
//! ```

use crate::config::DEFAULT_SITE;
use crate::registry::{ALL_SITES, Registry, Site};
use crate::table::RouteRecord;
use crate::value::{Map, Value, display};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

const PASSTHROUGH: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

/// Method variants tried when a name has no exact record.
const FALLBACKS: [&str; 3] = ["get", "post", "*"];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern"));

/// URL builder over a sealed registry, optionally bound to a request's site
/// and route.
#[derive(Clone, Copy)]
pub struct Url<'a> {
    registry: &'a Registry,
    site: Option<&'a str>,
    route: Option<&'a str>,
}

impl<'a> Url<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            site: None,
            route: None,
        }
    }

    /// Builder bound to the current request's site and route key.
    pub fn bound(registry: &'a Registry, site: &'a str, route: &'a str) -> Self {
        Self {
            registry,
            site: Some(site).filter(|s| !s.is_empty()),
            route: Some(route).filter(|r| !r.is_empty()),
        }
    }

    /// Like [`Url::route`] but always absolute.
    pub fn routo(&self, name: &str, values: &Map) -> String {
        let mut values = values.clone();
        values.insert("[site]".to_string(), Value::Bool(true));
        self.route(name, &values)
    }

    /// Build the URL of route `name`.
    ///
    /// An empty name means the current route. Undotted names, and dotted
    /// names whose prefix is not a known site, belong to the current site.
    /// Unknown routes come back unchanged.
    pub fn route(&self, name: &str, values: &Map) -> String {
        let name = name.to_lowercase();
        if PASSTHROUGH.iter().any(|scheme| name.starts_with(scheme)) {
            return name;
        }

        let mut params = Map::new();
        let mut query: BTreeMap<String, String> = BTreeMap::new();
        let mut options = Map::new();
        for (key, value) in values {
            if let Some(param) = key.strip_prefix('{').and_then(|k| k.strip_suffix('}')) {
                params.insert(param.to_string(), value.clone());
            } else if key.starts_with('[') && key.ends_with(']') {
                options.insert(key.to_lowercase(), value.clone());
            } else {
                query.insert(key.clone(), display(value));
            }
        }

        let Some((site_name, route_name)) = self.target(&name) else {
            return name;
        };

        // A request-bound builder switching sites goes absolute.
        if self.site.is_some_and(|current| current != site_name) {
            options.insert("[site]".to_string(), Value::String(site_name.clone()));
        }

        let Some(site) = self.registry.site(&site_name) else {
            return name;
        };
        let Some(record) = lookup(site, &route_name) else {
            return name;
        };

        let coerced = self
            .registry
            .mapper()
            .map(&record.config.args, &params, true, true)
            .unwrap_or_default();

        let mut uri = PLACEHOLDER
            .replace_all(&record.uri, |caps: &Captures<'_>| {
                let key = &caps[1];
                coerced
                    .get(key)
                    .or_else(|| params.get(key))
                    .map(display)
                    .unwrap_or_default()
            })
            .into_owned();

        if !query.is_empty() {
            let encoded = serde_urlencoded::to_string(&query).unwrap_or_default();
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&encoded);
        }

        match options.get("[site]") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => uri,
            Some(Value::String(target)) if !target.is_empty() => self.site(target, &uri, &options),
            Some(_) => self.site(&site_name, &uri, &options),
        }
    }

    /// Absolute base URL of site `name` joined with `path`.
    ///
    /// Host is the site's domain, else its first extra domain, else its bind
    /// host, else `localhost`. Unknown sites fall back to the default site.
    pub fn site(&self, name: &str, path: &str, options: &Map) -> String {
        let Some(site) = self
            .registry
            .site(name)
            .or_else(|| self.registry.default_site())
        else {
            return path.to_string();
        };
        let config = site.config();

        let mut host = std::iter::once(config.domain.as_str())
            .chain(config.domains.first().map(String::as_str))
            .chain(std::iter::once(config.host.as_str()))
            .find(|h| !h.is_empty())
            .unwrap_or("localhost")
            .to_string();

        if !host.contains(':') && config.port > 0 && config.port != 80 && config.port != 443 {
            host = format!("{host}:{}", config.port);
        }

        let flag = |key: &str| options.get(key).and_then(Value::as_bool).unwrap_or(false);
        let scheme = match (flag("[socket]"), flag("[ssl]")) {
            (true, true) => "wss://",
            (true, false) => "ws://",
            (false, true) => "https://",
            (false, false) => "http://",
        };

        if path.is_empty() {
            format!("{scheme}{host}")
        } else if path.starts_with('/') {
            format!("{scheme}{host}{path}")
        } else {
            format!("{scheme}{host}/{path}")
        }
    }

    /// Resolve a lower-cased name to `(site, route)`.
    fn target(&self, name: &str) -> Option<(String, String)> {
        let current = self.site.unwrap_or(DEFAULT_SITE).to_string();

        if name.is_empty() {
            return self.route.map(|route| (current, route.to_string()));
        }

        match name.split_once('.') {
            Some((ALL_SITES, rest)) => {
                let site = match self.site {
                    Some(site) => site.to_string(),
                    None => self.registry.sites().next()?.name().to_string(),
                };
                Some((site, rest.to_string()))
            }
            Some((prefix, rest)) if self.registry.site(prefix).is_some() => {
                Some((prefix.to_string(), rest.to_string()))
            }
            _ => Some((current, name.to_string())),
        }
    }
}

/// Exact record name, then the `get`, `post` and `*` variants.
fn lookup<'s>(site: &'s Site, route: &str) -> Option<&'s RouteRecord> {
    let routes = site.routes();
    routes.get(route).or_else(|| {
        FALLBACKS
            .iter()
            .find_map(|method| routes.get(&format!("{route}.{method}")))
    })
}

//! Route table construction.
//!
//! [`expand`] turns one [`Route`] declaration into the runtime configs it
//! stands for, and [`RouteTable`] stores them with one [`RouteRecord`] per
//! URI. Every registration surface (routes, filters, handlers, drivers,
//! configs) stores through [`Registrations`] under the same
//! [`OverridePolicy`].

use crate::args::Vars;
use crate::route::{Route, RouteOverride, Stage};
use crate::value::Map;
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What happens when a name is registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverridePolicy {
    /// The first registration is kept; later ones are ignored.
    #[default]
    FirstWins,
    /// A later registration replaces the stored one in place.
    OverrideWins,
}

/// Named registrations in first-registration order. Names are lower-cased.
#[derive(Clone)]
pub struct Registrations<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for Registrations<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> Registrations<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`; returns whether it was stored.
    pub fn insert(&mut self, name: &str, value: V, policy: OverridePolicy) -> bool {
        let name = name.to_lowercase();
        match self.index.get(&name) {
            Some(&at) => match policy {
                OverridePolicy::FirstWins => false,
                OverridePolicy::OverrideWins => {
                    self.entries[at].1 = value;
                    true
                }
            },
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.index
            .get(&name.to_lowercase())
            .map(|&at| &self.entries[at].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> fmt::Debug for Registrations<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Runtime configuration of one expanded route key (`user.get`, `user.*`).
#[derive(Clone)]
pub struct RouteConfig {
    pub key: String,
    pub logical: String,
    /// `None` answers any method.
    pub method: Option<Method>,
    pub uris: Vec<String>,
    pub name: String,
    pub desc: String,
    pub nullable: bool,
    pub args: Vars,
    pub data: Vars,
    pub setting: Map,
    /// Action steps with the single action, if any, last.
    pub actions: Vec<Stage>,
    pub sign: bool,
    pub auth: bool,
    pub found: Option<Stage>,
    pub error: Option<Stage>,
    pub failed: Option<Stage>,
    pub denied: Option<Stage>,
}

impl fmt::Debug for RouteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteConfig")
            .field("key", &self.key)
            .field("method", &self.method)
            .field("uris", &self.uris)
            .field("args", &self.args.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.len())
            .field("sign", &self.sign)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Parse a declared method; empty and `*` mean any method.
pub fn parse_method(method: &str) -> Option<Method> {
    let method = method.trim();
    if method.is_empty() || method == "*" {
        return None;
    }
    match Method::from_bytes(method.to_uppercase().as_bytes()) {
        Ok(method) => Some(method),
        Err(_) => {
            warn!(method, "Unrecognized route method, answering any method");
            None
        }
    }
}

fn merged_uris(route: &Route) -> Vec<String> {
    let mut uris = route.uris.clone();
    if uris.is_empty() || !route.uri.is_empty() {
        uris.push(route.uri.clone());
    }
    uris
}

fn actions_of(actions: &[Stage], action: &Option<Stage>) -> Vec<Stage> {
    actions.iter().cloned().chain(action.clone()).collect()
}

fn variant(logical: &str, method: &str, route: &Route, over: &RouteOverride, uris: &[String]) -> RouteConfig {
    let mut args = route.args.clone();
    args.extend(over.args.clone().unwrap_or_default());
    let mut data = route.data.clone();
    data.extend(over.data.clone().unwrap_or_default());
    let mut setting = route.setting.clone();
    setting.extend(over.setting.clone().unwrap_or_default());

    RouteConfig {
        key: format!("{logical}.{method}"),
        logical: logical.to_string(),
        method: parse_method(method),
        uris: uris.to_vec(),
        name: over.name.clone().unwrap_or_else(|| route.name.clone()),
        desc: over.desc.clone().unwrap_or_else(|| route.desc.clone()),
        nullable: over.nullable.unwrap_or(route.nullable),
        args,
        data,
        setting,
        actions: actions_of(over.actions.as_deref().unwrap_or_default(), &over.action),
        sign: route.sign,
        auth: route.auth,
        found: over.found.clone().or_else(|| route.found.clone()),
        error: over.error.clone().or_else(|| route.error.clone()),
        failed: over.failed.clone().or_else(|| route.failed.clone()),
        denied: over.denied.clone().or_else(|| route.denied.clone()),
    }
}

/// Expand a declaration into its route keys.
///
/// Method overrides come first in declaration order, followed by the
/// `logical.*` key when the declaration has an action of its own. A
/// declaration with neither produces nothing.
pub fn expand(logical: &str, route: &Route) -> Vec<RouteConfig> {
    let logical = logical.to_lowercase();
    let uris = merged_uris(route);

    let mut configs: Vec<RouteConfig> = route
        .routing
        .iter()
        .map(|(method, over)| variant(&logical, &method.to_lowercase(), route, over, &uris))
        .collect();

    if route.has_action() {
        configs.push(RouteConfig {
            key: format!("{logical}.*"),
            logical: logical.clone(),
            method: parse_method(&route.method),
            uris,
            name: route.name.clone(),
            desc: route.desc.clone(),
            nullable: route.nullable,
            args: route.args.clone(),
            data: route.data.clone(),
            setting: route.setting.clone(),
            actions: actions_of(&route.actions, &route.action),
            sign: route.sign,
            auth: route.auth,
            found: route.found.clone(),
            error: route.error.clone(),
            failed: route.failed.clone(),
            denied: route.denied.clone(),
        });
    }

    configs
}

/// One concrete (method, URI) binding inside a site.
#[derive(Debug, Clone)]
pub struct RouteRecord {
    /// Record name: the route key plus `.N` for every URI after the first.
    pub name: String,
    pub method: Option<Method>,
    pub uri: String,
    pub key: String,
    pub logical: String,
    pub config: Arc<RouteConfig>,
}

/// Route keys and their records for one site.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    configs: Registrations<Arc<RouteConfig>>,
    records: BTreeMap<String, RouteRecord>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand and store a declaration; returns how many keys were stored.
    pub fn add(&mut self, logical: &str, route: &Route, policy: OverridePolicy) -> usize {
        expand(logical, route)
            .into_iter()
            .filter(|config| self.insert(config.clone(), policy))
            .count()
    }

    /// Store one route key and (re)derive its records.
    pub fn insert(&mut self, config: RouteConfig, policy: OverridePolicy) -> bool {
        let key = config.key.to_lowercase();
        let config = Arc::new(config);
        if !self.configs.insert(&key, config.clone(), policy) {
            return false;
        }

        self.records.retain(|_, record| record.key != key);
        for (i, uri) in config.uris.iter().enumerate() {
            let name = if i == 0 {
                key.clone()
            } else {
                format!("{key}.{i}")
            };
            self.records.insert(
                name.clone(),
                RouteRecord {
                    name,
                    method: config.method.clone(),
                    uri: uri.clone(),
                    key: key.clone(),
                    logical: config.logical.clone(),
                    config: config.clone(),
                },
            );
        }
        true
    }

    /// Record by record name.
    pub fn get(&self, name: &str) -> Option<&RouteRecord> {
        self.records.get(&name.to_lowercase())
    }

    /// Runtime config by route key.
    pub fn config(&self, key: &str) -> Option<&Arc<RouteConfig>> {
        self.configs.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &RouteRecord> {
        self.records.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.configs.names()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

//! Site registry.
//!
//! Registration happens on a [`RegistryBuilder`]. [`RegistryBuilder::build`]
//! runs the setup pass once: it collects site names, layers configs,
//! resolves hosts, expands routes into every site's table and produces an
//! immutable [`Registry`] that request tasks share through an `Arc`.
//!
//! Registration names are dotted: `blog.post` belongs to site `blog`, an
//! undotted name belongs to site `default`, and `*.name` applies to every
//! site after the site-specific registrations.

use crate::args::{ArgumentMapper, BasicMapper};
use crate::config::{Config, Cross, DEFAULT_SITE};
use crate::context::Context;
use crate::driver::{Delegate, Driver};
use crate::encoder;
use crate::host::{HostTable, normalize_host};
use crate::locale::{KeyLocalizer, Languages, Localizer};
use crate::mime::{DefaultMimeTypes, MimeTypes};
use crate::pipeline::{self, Outcome};
use crate::route::{Filter, Handler, Route, Stage, stage};
use crate::security::TokenVerifier;
use crate::table::{OverridePolicy, Registrations, RouteConfig, RouteRecord, RouteTable};
use crate::url::Url;
use crate::value::Map;
use bytes::Bytes;
use http::header::HOST;
use http::{Request, Response};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Prefix that applies a registration to every site.
pub const ALL_SITES: &str = "*";

/// Split `site.name` into its site and name; undotted names belong to the
/// default site. Both parts are lower-cased.
pub fn split_prefix(name: &str) -> (String, String) {
    let name = name.to_lowercase();
    if name.is_empty() {
        return (String::new(), String::new());
    }
    match name.split_once('.') {
        Some((site, rest)) => (site.to_string(), rest.to_string()),
        None => (DEFAULT_SITE.to_string(), name),
    }
}

/// One tenant: merged config, route table, filters and handlers.
pub struct Site {
    name: String,
    config: Config,
    cross: Cross,
    setting: Map,
    hosts: Vec<String>,
    routes: RouteTable,
    filters: Registrations<Filter>,
    handlers: Registrations<Handler>,

    open_chain: Vec<Stage>,
    serve_chain: Vec<Stage>,
    request_chain: Vec<Stage>,
    execute_filters: Vec<Stage>,
    response_filters: Vec<Stage>,
    found_handlers: Vec<Stage>,
    error_handlers: Vec<Stage>,
    failed_handlers: Vec<Stage>,
    denied_handlers: Vec<Stage>,
}

impl Site {
    fn new(name: String, config: Config, cross: Cross, hosts: Vec<String>) -> Self {
        Self {
            setting: config.setting(),
            name,
            config,
            cross,
            hosts,
            routes: RouteTable::new(),
            filters: Registrations::new(),
            handlers: Registrations::new(),
            open_chain: Vec::new(),
            serve_chain: Vec::new(),
            request_chain: Vec::new(),
            execute_filters: Vec::new(),
            response_filters: Vec::new(),
            found_handlers: Vec::new(),
            error_handlers: Vec::new(),
            failed_handlers: Vec::new(),
            denied_handlers: Vec::new(),
        }
    }

    /// Build the stage lists from the registered filters and handlers.
    fn seal(&mut self) {
        let filters: Vec<&Filter> = self.filters.iter().map(|(_, f)| f).collect();
        let handlers: Vec<&Handler> = self.handlers.iter().map(|(_, h)| h).collect();

        self.open_chain = std::iter::once(stage(pipeline::preprocessing))
            .chain(filters.iter().filter_map(|f| f.serve.clone()))
            .chain(std::iter::once(stage(pipeline::serve)))
            .collect();
        self.serve_chain = std::iter::once(stage(pipeline::finding))
            .chain(filters.iter().filter_map(|f| f.request.clone()))
            .chain(std::iter::once(stage(pipeline::request)))
            .collect();
        self.request_chain = vec![
            stage(crate::cors::crossing),
            stage(crate::parsing::parsing),
            stage(pipeline::authorizing),
            stage(pipeline::arguing),
            stage(pipeline::execute),
        ];
        self.execute_filters = filters.iter().filter_map(|f| f.execute.clone()).collect();
        self.response_filters = filters.iter().filter_map(|f| f.response.clone()).collect();

        self.found_handlers = handlers.iter().filter_map(|h| h.found.clone()).collect();
        self.error_handlers = handlers.iter().filter_map(|h| h.error.clone()).collect();
        self.failed_handlers = handlers.iter().filter_map(|h| h.failed.clone()).collect();
        self.denied_handlers = handlers.iter().filter_map(|h| h.denied.clone()).collect();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cross(&self) -> &Cross {
        &self.cross
    }

    pub fn setting(&self) -> &Map {
        &self.setting
    }

    /// Normalized hosts; the first is the site's primary domain.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn filters(&self) -> &Registrations<Filter> {
        &self.filters
    }

    pub fn handlers(&self) -> &Registrations<Handler> {
        &self.handlers
    }

    pub(crate) fn open_chain(&self) -> Vec<Stage> {
        self.open_chain.clone()
    }

    pub(crate) fn serve_chain(&self) -> Vec<Stage> {
        self.serve_chain.clone()
    }

    pub(crate) fn request_chain(&self) -> Vec<Stage> {
        self.request_chain.clone()
    }

    pub(crate) fn execute_chain(&self, route: Option<&RouteConfig>) -> Vec<Stage> {
        let mut chain = self.execute_filters.clone();
        if let Some(route) = route {
            chain.extend(route.actions.iter().cloned());
        }
        chain
    }

    pub(crate) fn response_chain(&self) -> Vec<Stage> {
        self.response_filters.clone()
    }

    /// Route override, site handlers in registration order, then the default.
    pub(crate) fn terminal_chain(&self, outcome: Outcome, route: Option<&RouteConfig>) -> Vec<Stage> {
        let handlers = match outcome {
            Outcome::Found => &self.found_handlers,
            Outcome::Error => &self.error_handlers,
            Outcome::Failed => &self.failed_handlers,
            Outcome::Denied => &self.denied_handlers,
        };

        route
            .and_then(|route| outcome.route_handler(route))
            .into_iter()
            .chain(handlers.iter().cloned())
            .chain(std::iter::once(outcome.default_stage()))
            .collect()
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Site")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("routes", &self.routes.len())
            .field("filters", &self.filters)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// A route record as handed to a connector.
#[derive(Debug, Clone)]
pub struct Binding {
    /// `site.record`
    pub name: String,
    pub record: RouteRecord,
    pub hosts: Vec<String>,
}

/// Registration phase of the registry.
pub struct RegistryBuilder {
    policy: OverridePolicy,
    config: Option<Config>,
    configs: BTreeMap<String, Config>,
    cross: Cross,
    routes: Registrations<Route>,
    filters: Registrations<Filter>,
    handlers: Registrations<Handler>,
    drivers: Registrations<Arc<dyn Driver>>,
    mapper: Arc<dyn ArgumentMapper>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    localizer: Arc<dyn Localizer>,
    mimes: Arc<dyn MimeTypes>,
    languages: Languages,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            policy: OverridePolicy::default(),
            config: None,
            configs: BTreeMap::new(),
            cross: Cross::default(),
            routes: Registrations::new(),
            filters: Registrations::new(),
            handlers: Registrations::new(),
            drivers: Registrations::new(),
            mapper: Arc::new(BasicMapper),
            verifier: None,
            localizer: Arc::new(KeyLocalizer),
            mimes: Arc::new(DefaultMimeTypes),
            languages: Languages::new(),
        }
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: OverridePolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    pub fn register_route(&mut self, name: &str, route: Route) -> bool {
        let stored = self.routes.insert(name, route, self.policy);
        debug!(name, stored, "Registered route");
        stored
    }

    pub fn register_filter(&mut self, name: &str, mut filter: Filter) -> bool {
        if filter.name.is_empty() {
            filter.name = name.to_lowercase();
        }
        let stored = self.filters.insert(name, filter, self.policy);
        debug!(name, stored, "Registered filter");
        stored
    }

    pub fn register_handler(&mut self, name: &str, mut handler: Handler) -> bool {
        if handler.name.is_empty() {
            handler.name = name.to_lowercase();
        }
        let stored = self.handlers.insert(name, handler, self.policy);
        debug!(name, stored, "Registered handler");
        stored
    }

    pub fn register_driver(&mut self, name: &str, driver: Arc<dyn Driver>) -> bool {
        self.drivers.insert(name, driver, self.policy)
    }

    /// Layer a config over `base`: later fields win under
    /// [`OverridePolicy::OverrideWins`], earlier ones otherwise.
    fn layer(policy: OverridePolicy, base: &Config, config: &Config) -> Config {
        match policy {
            OverridePolicy::OverrideWins => base.merge(config),
            OverridePolicy::FirstWins => config.merge(base),
        }
    }

    /// Process-wide config, inherited by every site.
    pub fn configure(&mut self, config: Config) -> &mut Self {
        self.config = Some(match &self.config {
            Some(base) => Self::layer(self.policy, base, &config),
            None => config,
        });
        self
    }

    /// Config of one site, layered over the process-wide config.
    pub fn configure_site(&mut self, name: &str, config: Config) -> &mut Self {
        let name = name.to_lowercase();
        let layered = match self.configs.get(&name) {
            Some(base) => Self::layer(self.policy, base, &config),
            None => config,
        };
        self.configs.insert(name, layered);
        self
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn site_config(&self, name: &str) -> Option<&Config> {
        self.configs.get(&name.to_lowercase())
    }

    pub fn cross(&self) -> &Cross {
        &self.cross
    }

    pub fn set_cross(&mut self, cross: Cross) -> &mut Self {
        self.cross = cross;
        self
    }

    pub fn set_mapper(&mut self, mapper: Arc<dyn ArgumentMapper>) -> &mut Self {
        self.mapper = mapper;
        self
    }

    pub fn set_verifier(&mut self, verifier: Arc<dyn TokenVerifier>) -> &mut Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn set_localizer(&mut self, localizer: Arc<dyn Localizer>) -> &mut Self {
        self.localizer = localizer;
        self
    }

    pub fn set_mimes(&mut self, mimes: Arc<dyn MimeTypes>) -> &mut Self {
        self.mimes = mimes;
        self
    }

    pub fn register_language<I, S>(&mut self, lang: &str, accepts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages.insert(lang, accepts);
        self
    }

    fn site_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = BTreeSet::from([DEFAULT_SITE.to_string()]);
        names.extend(self.configs.keys().cloned());

        let registered = self
            .routes
            .names()
            .chain(self.filters.names())
            .chain(self.handlers.names());
        for name in registered {
            let (site, _) = split_prefix(name);
            if site != ALL_SITES {
                names.insert(site);
            }
        }
        names
    }

    /// Explicit domains of the site's own config, else a name derived from
    /// the global domain. Normalized, de-duplicated, in order.
    fn site_hosts(&self, name: &str, global: &Config) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        if let Some(own) = self.configs.get(name) {
            hosts.extend(std::iter::once(own.domain.clone()).filter(|d| !d.is_empty()));
            hosts.extend(own.domains.iter().cloned());
        }

        if hosts.is_empty() && !global.domain.is_empty() {
            if name == DEFAULT_SITE {
                hosts.push(global.domain.clone());
                hosts.extend(global.domains.iter().cloned());
            } else {
                hosts.push(format!("{name}.{}", global.domain));
            }
        }

        let mut seen = BTreeSet::new();
        hosts
            .iter()
            .map(|h| normalize_host(h))
            .filter(|h| !h.is_empty() && seen.insert(h.clone()))
            .collect()
    }

    /// Run setup and seal the registry.
    pub fn build(self) -> Arc<Registry> {
        let policy = self.policy;
        let process = self.config.clone().unwrap_or_default();

        let mut global = Config::compiled().merge(&process);
        global.apply_defaults();

        let mut sites: BTreeMap<String, Site> = BTreeMap::new();
        for name in self.site_names() {
            let mut config = Config::compiled().merge(&process);
            if let Some(own) = self.configs.get(&name) {
                config = config.merge(own);
            }
            config.apply_defaults();
            config.apply_site_defaults(&name, &global);

            let hosts = self.site_hosts(&name, &global);
            if let Some((first, rest)) = hosts.split_first() {
                config.domain = first.clone();
                config.domains = rest.to_vec();
            }

            sites.insert(
                name.clone(),
                Site::new(name, config, self.cross.clone(), hosts),
            );
        }

        // Site-specific registrations first, then the `*` ones.
        for wildcard in [false, true] {
            for (key, route) in self.routes.iter() {
                let (site, name) = split_prefix(key);
                for target in targets(&mut sites, &site, wildcard) {
                    target.routes.add(&name, route, policy);
                }
            }
            for (key, filter) in self.filters.iter() {
                let (site, name) = split_prefix(key);
                for target in targets(&mut sites, &site, wildcard) {
                    target.filters.insert(&name, filter.clone(), policy);
                }
            }
            for (key, handler) in self.handlers.iter() {
                let (site, name) = split_prefix(key);
                for target in targets(&mut sites, &site, wildcard) {
                    target.handlers.insert(&name, handler.clone(), policy);
                }
            }
        }

        let mut hosts = HostTable::new();
        for site in sites.values_mut() {
            for host in &site.hosts {
                hosts.insert(host, &site.name, policy);
            }
            site.seal();
            debug!(
                site = %site.name,
                routes = site.routes.len(),
                hosts = ?site.hosts,
                "Site ready"
            );
        }

        let sites: BTreeMap<String, Arc<Site>> = sites
            .into_iter()
            .map(|(name, site)| (name, Arc::new(site)))
            .collect();

        Arc::new_cyclic(|me| Registry {
            me: me.clone(),
            policy,
            config: global,
            sites,
            hosts,
            default_site: DEFAULT_SITE.to_string(),
            drivers: self.drivers,
            mapper: self.mapper,
            verifier: self.verifier,
            localizer: self.localizer,
            mimes: self.mimes,
            languages: self.languages,
        })
    }
}

fn targets<'a>(
    sites: &'a mut BTreeMap<String, Site>,
    site: &str,
    wildcard: bool,
) -> Vec<&'a mut Site> {
    match (site == ALL_SITES, wildcard) {
        (true, true) => sites.values_mut().collect(),
        (false, false) => sites.get_mut(site).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Sealed registry shared by every request.
pub struct Registry {
    me: Weak<Registry>,
    policy: OverridePolicy,
    config: Config,
    sites: BTreeMap<String, Arc<Site>>,
    hosts: HostTable,
    default_site: String,
    drivers: Registrations<Arc<dyn Driver>>,
    mapper: Arc<dyn ArgumentMapper>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    localizer: Arc<dyn Localizer>,
    mimes: Arc<dyn MimeTypes>,
    languages: Languages,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    /// Process-wide config with defaults applied.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn site(&self, name: &str) -> Option<&Site> {
        self.sites.get(&name.to_lowercase()).map(|s| s.as_ref())
    }

    /// Sites in name order.
    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values().map(|s| s.as_ref())
    }

    pub fn default_site(&self) -> Option<&Site> {
        self.site(&self.default_site)
    }

    /// Site owning `host`, falling back to the default site.
    pub fn resolve_site(&self, host: &str) -> &str {
        self.hosts.resolve(host).unwrap_or(&self.default_site)
    }

    pub fn driver(&self, name: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.get(name)
    }

    /// Every route record with its `site.record` name and site hosts.
    pub fn bindings(&self) -> Vec<Binding> {
        self.sites
            .values()
            .flat_map(|site| {
                site.routes.records().map(move |record| Binding {
                    name: format!("{}.{}", site.name, record.name),
                    record: record.clone(),
                    hosts: site.hosts.clone(),
                })
            })
            .collect()
    }

    /// Reverse URL builder with no request context.
    pub fn url(&self) -> Url<'_> {
        Url::new(self)
    }

    pub(crate) fn mapper(&self) -> &dyn ArgumentMapper {
        self.mapper.as_ref()
    }

    pub(crate) fn verifier(&self) -> Option<&dyn TokenVerifier> {
        self.verifier.as_deref()
    }

    pub(crate) fn localizer(&self) -> &dyn Localizer {
        self.localizer.as_ref()
    }

    pub(crate) fn mimes(&self) -> &dyn MimeTypes {
        self.mimes.as_ref()
    }

    pub(crate) fn languages(&self) -> &Languages {
        &self.languages
    }

    /// Dispatch a request for `site.record` (or `""` when nothing matched).
    ///
    /// The name's site prefix wins when it names a non-default site;
    /// otherwise the request host picks the site.
    pub fn serve(&self, name: &str, params: Map, request: Request<Bytes>) -> Response<Bytes> {
        let Some(registry) = self.me.upgrade() else {
            return encoder::internal_error();
        };

        let (prefix, rest) = split_prefix(name);
        let by_prefix = (!prefix.is_empty() && prefix != DEFAULT_SITE)
            .then(|| self.sites.get(&prefix))
            .flatten();
        let site = by_prefix
            .or_else(|| {
                let host = request
                    .headers()
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .or_else(|| request.uri().host())?;
                self.hosts.resolve(host).and_then(|s| self.sites.get(s))
            })
            .or_else(|| self.sites.get(&self.default_site));

        let Some(site) = site.cloned() else {
            return encoder::internal_error();
        };

        let route = if name.is_empty() {
            String::new()
        } else if rest.is_empty() {
            name.to_lowercase()
        } else {
            rest
        };
        let record = site.routes.get(&route).cloned();

        debug!(
            site = %site.name,
            route = record.as_ref().map(|r| r.key.as_str()).unwrap_or_default(),
            "Dispatching request"
        );

        let mut ctx = Context::new(registry, site.clone(), record.as_ref(), params, request);
        ctx.run_chain(site.open_chain());
        ctx.finish()
    }
}

impl Delegate for Registry {
    fn serve(&self, name: &str, params: Map, request: Request<Bytes>) -> Response<Bytes> {
        Registry::serve(self, name, params, request)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("policy", &self.policy)
            .field("sites", &self.sites.values().collect::<Vec<_>>())
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn noop(_: &mut Context) {}

    #[test]
    fn test_split_prefix() {
        assert_eq!(split_prefix("Blog.Post.get"), ("blog".into(), "post.get".into()));
        assert_eq!(split_prefix("index"), ("default".into(), "index".into()));
        assert_eq!(split_prefix(""), (String::new(), String::new()));
    }

    #[test]
    fn test_site_names_from_registrations() {
        let mut builder = Registry::builder();
        builder.register_route("blog.post", Route::new("/post").action(noop));
        builder.register_filter("*.audit", Filter::new().serve(|ctx| ctx.next()));
        builder.configure_site("shop", Config::new());

        let registry = builder.build();
        let names: Vec<_> = registry.sites().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["blog", "default", "shop"]);

        for site in registry.sites() {
            assert!(site.filters().contains("audit"));
        }
    }

    #[test]
    fn test_config_layering() {
        let mut builder = Registry::builder();
        builder.configure(
            Config::new()
                .with_port(9000)
                .with_charset("gbk")
                .with_domain("example.com"),
        );
        builder.configure_site("blog", Config::new().with_port(9100));
        builder.configure_site("shop", Config::new().with_static_root("/srv/shop"));

        let registry = builder.build();
        let blog = registry.site("blog").unwrap();
        assert_eq!(blog.config().port, 9100);
        assert_eq!(blog.config().charset, "gbk");
        assert_eq!(blog.config().static_root, "asset/statics/blog");
        assert_eq!(blog.hosts(), ["blog.example.com"]);
        assert_eq!(blog.config().domain, "blog.example.com");

        let shop = registry.site("shop").unwrap();
        assert_eq!(shop.config().port, 9000);
        assert_eq!(shop.config().static_root, "/srv/shop");

        let default = registry.default_site().unwrap();
        assert_eq!(default.config().static_root, "asset/statics");
        assert_eq!(default.hosts(), ["example.com"]);
    }

    #[test]
    fn test_host_dedup_and_primary_domain() {
        let mut builder = Registry::builder();
        builder.configure_site(
            "api",
            Config::new()
                .with_domain("API.test")
                .with_domains(["api.test:8080", "https://v2.api.test/"]),
        );
        let registry = builder.build();
        let api = registry.site("api").unwrap();
        assert_eq!(api.hosts(), ["api.test", "v2.api.test"]);
        assert_eq!(api.config().domain, "api.test");
        assert_eq!(api.config().domains, vec!["v2.api.test".to_string()]);
    }

    #[test]
    fn test_resolve_site() {
        let mut builder = Registry::builder();
        builder.configure_site("alpha", Config::new().with_domain("a.example.com"));
        builder.configure_site("tenant", Config::new().with_domain("*.example.com"));
        let registry = builder.build();

        assert_eq!(registry.resolve_site("a.example.com"), "alpha");
        assert_eq!(registry.resolve_site("b.example.com"), "tenant");
        assert_eq!(registry.resolve_site("unknown.test"), "default");
    }

    #[test]
    fn test_wildcard_registrations_after_site_ones() {
        let mut builder = Registry::builder();
        builder.register_route("*.home", Route::new("/everywhere").action(noop));
        builder.register_route("blog.home", Route::new("/blog-home").action(noop));

        let registry = builder.build();
        let blog = registry.site("blog").unwrap();
        assert_eq!(blog.routes().get("home.*").unwrap().uri, "/blog-home");
        let default = registry.default_site().unwrap();
        assert_eq!(default.routes().get("home.*").unwrap().uri, "/everywhere");
    }

    #[test]
    fn test_wildcard_overrides_under_override_policy() {
        let mut builder = Registry::builder();
        builder.set_policy(OverridePolicy::OverrideWins);
        builder.register_route("blog.home", Route::new("/blog-home").action(noop));
        builder.register_route("*.home", Route::new("/everywhere").action(noop));

        let registry = builder.build();
        let blog = registry.site("blog").unwrap();
        assert_eq!(blog.routes().get("home.*").unwrap().uri, "/everywhere");
    }

    #[test]
    fn test_bindings() {
        let mut builder = Registry::builder();
        builder.register_route("blog.post", Route::new("/a").uris(["/b"]).action(noop));
        let registry = builder.build();

        let mut names: Vec<_> = registry.bindings().into_iter().map(|b| b.name).collect();
        names.sort();
        assert_eq!(names, vec!["blog.post.*", "blog.post.*.1"]);
    }

    #[test]
    fn test_configure_site_policy() {
        let mut builder = Registry::builder();
        builder.configure_site("blog", Config::new().with_port(1));
        builder.configure_site("blog", Config::new().with_port(2).with_charset("latin1"));
        assert_eq!(builder.site_config("blog").unwrap().port, 1);
        assert_eq!(builder.site_config("blog").unwrap().charset, "latin1");

        builder.set_policy(OverridePolicy::OverrideWins);
        builder.configure_site("blog", Config::new().with_port(3));
        assert_eq!(builder.site_config("blog").unwrap().port, 3);
    }
}

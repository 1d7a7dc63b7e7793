//! Layered settings tree and the sections Palisade reads from it.
//!
//! Sources are merged in load order; a later source overrides the keys it
//! sets and keeps the rest. [`Settings::apply`] then hands three sections to
//! an [`Application`]:
//!
//! - `web`: process-wide config; its nested `site` / `sites` table holds one
//!   table per site, and loose scalar entries there configure the default site
//! - `site`: the same per-site layout at the top level
//! - `cross`: the cross-origin policy
//!
//! The `log` section is read separately by [`Settings::init_logging`], since
//! a subscriber is installed once per process rather than per application.

use crate::env::EnvLoader;
use crate::loader::{ConfigLoader, FileFormat};
use crate::log::LogSection;
use crate::{ConfigError, Result};
use palisade_core::logging::WorkerGuard;
use palisade_core::{Application, Config, Cross, DEFAULT_SITE};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Configuration sections ready to be applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    pub web: Option<Config>,
    /// Per-site configs in the order they were found.
    pub sites: Vec<(String, Config)>,
    pub cross: Option<Cross>,
    pub log: Option<LogSection>,
}

/// Merged settings tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    root: Map<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON, TOML or `.env` file, detected by extension
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let value = ConfigLoader::auto(path)?.load_file(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        self.merge_value(value)
    }

    /// Parse `content` in the given format
    pub fn load_str(&mut self, content: &str, format: FileFormat) -> Result<&mut Self> {
        let value = ConfigLoader::new(format).parse(content)?;
        self.merge_value(value)
    }

    /// Merge environment variables carrying `prefix`
    pub fn load_env(&mut self, prefix: &str) -> Result<&mut Self> {
        let table = EnvLoader::new(Some(prefix.to_string())).load()?;
        debug!(prefix, keys = table.len(), "Loaded environment configuration");
        self.merge_value(Value::Object(table))
    }

    /// Export a `.env` file into the process environment, then merge the
    /// variables carrying `prefix`. A missing default `.env` is not an error.
    pub fn load_dotenv(&mut self, path: Option<&Path>, prefix: &str) -> Result<&mut Self> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env(prefix)
    }

    /// Deep-merge another settings tree over this one
    pub fn merge(&mut self, other: &Settings) -> &mut Self {
        merge_into(&mut self.root, other.root.clone());
        self
    }

    fn merge_value(&mut self, value: Value) -> Result<&mut Self> {
        match value {
            Value::Object(table) => {
                merge_into(&mut self.root, table);
                Ok(self)
            }
            _ => Err(ConfigError::ParseError(
                "configuration root must be a table".to_string(),
            )),
        }
    }

    /// Value at a dotted path such as `web.port`
    pub fn value(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = self.root.get(parts.next()?)?;
        parts.try_fold(first, |value, part| value.as_object()?.get(part))
    }

    /// Typed value at a dotted path
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self
            .value(path)
            .ok_or_else(|| ConfigError::KeyNotFound(path.to_string()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::DeserializationError(format!("{path}: {e}")))
    }

    /// Typed value with default
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    pub fn has(&self, path: &str) -> bool {
        self.value(path).is_some()
    }

    /// Split the tree into the `web`, `site` and `cross` sections.
    pub fn sections(&self) -> Result<Sections> {
        let mut sections = Sections::default();

        if let Some(web) = self.root.get("web").and_then(Value::as_object) {
            let mut root = Map::new();
            for (key, value) in web {
                if key == "site" || key == "sites" {
                    if let Some(sites) = value.as_object() {
                        collect_sites(sites, &mut sections.sites)?;
                    }
                    continue;
                }
                root.insert(key.clone(), value.clone());
            }
            sections.web = Some(parse_section("web", root)?);
        }

        if let Some(sites) = self.root.get("site").and_then(Value::as_object) {
            collect_sites(sites, &mut sections.sites)?;
        }

        if let Some(cross) = self.root.get("cross").and_then(Value::as_object) {
            sections.cross = Some(parse_section("cross", cross.clone())?);
        }

        if let Some(log) = self.root.get("log").and_then(Value::as_object) {
            sections.log = Some(parse_section("log", log.clone())?);
        }

        Ok(sections)
    }

    /// Hand every section to `app`. Ignored once the registry is sealed.
    pub fn apply(&self, app: &Application) -> Result<()> {
        let sections = self.sections()?;

        if let Some(web) = sections.web {
            app.configure(web);
        }
        for (name, config) in &sections.sites {
            app.configure_site(name, config.clone());
        }
        if let Some(cross) = sections.cross {
            app.set_cross(cross);
        }

        info!(sites = sections.sites.len(), "Configuration applied");
        Ok(())
    }

    /// Install the tracing subscriber described by the `log` section.
    ///
    /// Returns `None` without a `log` section. Keep the guard alive so
    /// buffered lines are flushed.
    pub fn init_logging(&self) -> Result<Option<WorkerGuard>> {
        let Some(section) = self.sections()?.log else {
            return Ok(None);
        };
        let guard = section
            .to_log_config()?
            .init()
            .map_err(|e| ConfigError::SectionError {
                section: "log".to_string(),
                message: e.to_string(),
            })?;
        debug!("Logging initialized from configuration");
        Ok(Some(guard))
    }
}

/// Tables become per-site configs; loose scalars go to the default site.
fn collect_sites(sites: &Map<String, Value>, out: &mut Vec<(String, Config)>) -> Result<()> {
    let mut loose = Map::new();
    for (name, value) in sites {
        match value {
            Value::Object(table) => {
                let section = format!("site.{name}");
                out.push((name.to_lowercase(), parse_section(&section, table.clone())?));
            }
            other => {
                loose.insert(name.clone(), other.clone());
            }
        }
    }
    if !loose.is_empty() {
        out.push((DEFAULT_SITE.to_string(), parse_section("site", loose)?));
    }
    Ok(())
}

fn parse_section<T: DeserializeOwned>(section: &str, table: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(table)).map_err(|e| ConfigError::SectionError {
        section: section.to_string(),
        message: e.to_string(),
    })
}

fn merge_into(base: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn settings(value: Value) -> Settings {
        let mut settings = Settings::new();
        settings.merge_value(value).unwrap();
        settings
    }

    #[test]
    fn test_deep_merge() {
        let mut base = settings(json!({"web": {"port": 8000, "charset": "gbk"}}));
        let other = settings(json!({"web": {"port": 9000}, "cross": {"allow": false}}));
        base.merge(&other);

        assert_eq!(base.get::<u16>("web.port").unwrap(), 9000);
        assert_eq!(base.get::<String>("web.charset").unwrap(), "gbk");
        assert!(!base.get::<bool>("cross.allow").unwrap());
    }

    #[test]
    fn test_get_missing_and_default() {
        let settings = settings(json!({"web": {"port": 8000}}));
        assert!(matches!(
            settings.get::<u16>("web.host"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert_eq!(settings.get_or("web.host", "0.0.0.0".to_string()), "0.0.0.0");
        assert!(settings.has("web"));
        assert!(!settings.has("web.port.deeper"));
    }

    #[test]
    fn test_web_section_and_nested_sites() {
        let settings = settings(json!({
            "web": {
                "port": 8000,
                "maxage": "1h",
                "site": {
                    "Shop": { "domain": "shop.test", "charset": "gbk" },
                    "cookie": "sid"
                }
            }
        }));
        let sections = settings.sections().unwrap();

        let web = sections.web.unwrap();
        assert_eq!(web.port, 8000);
        assert_eq!(web.max_age, Duration::from_secs(3600));

        assert_eq!(sections.sites.len(), 2);
        let (name, shop) = &sections.sites[0];
        assert_eq!(name, "shop");
        assert_eq!(shop.domain, "shop.test");
        assert_eq!(shop.charset, "gbk");

        let (name, default) = &sections.sites[1];
        assert_eq!(name, DEFAULT_SITE);
        assert_eq!(default.cookie, "sid");
    }

    #[test]
    fn test_top_level_site_and_cross() {
        let settings = settings(json!({
            "site": { "admin": { "domains": ["admin.test", "ops.test"] } },
            "cross": { "allow": true, "origins": ["https://app.test"], "methods": "GET" }
        }));
        let sections = settings.sections().unwrap();

        assert!(sections.web.is_none());
        assert_eq!(sections.sites[0].0, "admin");
        assert_eq!(sections.sites[0].1.domains, vec!["admin.test", "ops.test"]);

        let cross = sections.cross.unwrap();
        assert!(cross.allow);
        assert_eq!(cross.origins, vec!["https://app.test"]);
        assert_eq!(cross.methods, vec!["GET"]);
    }

    #[test]
    fn test_log_section() {
        let without = settings(json!({"web": {}}));
        assert!(without.init_logging().unwrap().is_none());

        let with = settings(json!({
            "log": { "level": "warn", "format": "plain", "file": "app.log" }
        }));
        let log = with.sections().unwrap().log.unwrap();
        assert_eq!(log.level.as_deref(), Some("warn"));
        assert_eq!(log.file.as_deref(), Some("app.log"));
    }

    #[test]
    fn test_unopenable_log_file_is_section_error() {
        let settings = settings(json!({
            "log": { "file": "/nonexistent-dir/palisade/app.log" }
        }));
        match settings.init_logging() {
            Err(ConfigError::SectionError { section, .. }) => assert_eq!(section, "log"),
            other => panic!("unexpected {:?}", other.map(|g| g.is_some())),
        }
    }

    #[test]
    fn test_bad_section_names_the_section() {
        let settings = settings(json!({"web": {"port": "not a port"}}));
        match settings.sections() {
            Err(ConfigError::SectionError { section, .. }) => assert_eq!(section, "web"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_table_root_rejected() {
        let mut settings = Settings::new();
        assert!(settings.load_str("[1, 2]", FileFormat::Json).is_err());
    }
}

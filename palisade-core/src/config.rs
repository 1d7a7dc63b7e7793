//! Site configuration and cross-origin policy.
//!
//! A site's effective [`Config`] is built from three layers: compiled
//! defaults, the process-wide config, and the site's own config. A later
//! layer only overrides the fields it sets: empty strings, zero numbers,
//! empty lists and `false` flags inherit from the layer below.

use crate::value::{Map, Value, string_list};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the site that owns undotted registrations.
pub const DEFAULT_SITE: &str = "default";

/// Name of the built-in connector.
pub const DEFAULT_DRIVER: &str = "default";

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_CHARSET: &str = "utf-8";
pub const DEFAULT_STATIC: &str = "asset/statics";
pub const DEFAULT_SHARED: &str = "shared";
/// Largest request body the connector buffers, in bytes.
pub const DEFAULT_BODY_LIMIT: u64 = 32 << 20;
pub const DEFAULT_DOCUMENTS: [&str; 4] = ["index.html", "default.html", "index.htm", "default.htm"];

const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Network, cookie, static-file and host settings of one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub driver: String,
    pub port: u16,
    #[serde(alias = "bind")]
    pub host: String,

    #[serde(alias = "cert", alias = "certfile")]
    pub cert_file: String,
    #[serde(alias = "key", alias = "keyfile")]
    pub key_file: String,

    pub charset: String,
    #[serde(alias = "bodylimit")]
    pub body_limit: u64,

    /// Session cookie name.
    pub cookie: String,
    pub token: bool,
    #[serde(with = "duration")]
    pub expire: Duration,
    pub crypto: bool,
    #[serde(alias = "maxage", with = "duration")]
    pub max_age: Duration,
    #[serde(alias = "httponly")]
    pub http_only: bool,

    pub upload: String,
    #[serde(rename = "static")]
    pub static_root: String,
    pub shared: String,
    #[serde(deserialize_with = "list")]
    pub defaults: Vec<String>,

    #[serde(deserialize_with = "first")]
    pub domain: String,
    #[serde(deserialize_with = "list")]
    pub domains: Vec<String>,

    pub setting: Option<Map>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled defaults every site starts from.
    pub fn compiled() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            port: DEFAULT_PORT,
            charset: DEFAULT_CHARSET.to_string(),
            ..Self::default()
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into().to_lowercase();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_tls(mut self, cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        self.cert_file = cert_file.into();
        self.key_file = key_file.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_body_limit(mut self, bytes: u64) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = cookie.into();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_upload(mut self, upload: impl Into<String>) -> Self {
        self.upload = upload.into();
        self
    }

    pub fn with_static_root(mut self, root: impl Into<String>) -> Self {
        self.static_root = root.into();
        self
    }

    pub fn with_shared(mut self, shared: impl Into<String>) -> Self {
        self.shared = shared.into();
        self
    }

    pub fn with_defaults(mut self, documents: Vec<String>) -> Self {
        self.defaults = documents;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.setting
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Layer `other` on top of `self`.
    pub fn merge(&self, other: &Config) -> Config {
        fn pick(base: &str, new: &str) -> String {
            if new.is_empty() { base } else { new }.to_string()
        }

        let mut out = self.clone();
        out.driver = pick(&self.driver, &other.driver);
        if other.port != 0 {
            out.port = other.port;
        }
        out.host = pick(&self.host, &other.host);
        out.cert_file = pick(&self.cert_file, &other.cert_file);
        out.key_file = pick(&self.key_file, &other.key_file);
        out.charset = pick(&self.charset, &other.charset);
        if other.body_limit != 0 {
            out.body_limit = other.body_limit;
        }
        out.cookie = pick(&self.cookie, &other.cookie);
        out.token |= other.token;
        if !other.expire.is_zero() {
            out.expire = other.expire;
        }
        out.crypto |= other.crypto;
        if !other.max_age.is_zero() {
            out.max_age = other.max_age;
        }
        out.http_only |= other.http_only;
        out.upload = pick(&self.upload, &other.upload);
        out.static_root = pick(&self.static_root, &other.static_root);
        out.shared = pick(&self.shared, &other.shared);
        if !other.defaults.is_empty() {
            out.defaults = other.defaults.clone();
        }
        out.domain = pick(&self.domain, &other.domain);
        if !other.domains.is_empty() {
            out.domains = other.domains.clone();
        }
        if other.setting.is_some() {
            out.setting = other.setting.clone();
        }
        out
    }

    /// Fill every unset field with its derived default.
    pub(crate) fn apply_defaults(&mut self) {
        if self.driver.is_empty() {
            self.driver = DEFAULT_DRIVER.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.charset.is_empty() {
            self.charset = DEFAULT_CHARSET.to_string();
        }
        if self.body_limit == 0 {
            self.body_limit = DEFAULT_BODY_LIMIT;
        }
        if self.defaults.is_empty() {
            self.defaults = DEFAULT_DOCUMENTS.iter().map(|d| d.to_string()).collect();
        }
        if self.upload.is_empty() {
            self.upload = std::env::temp_dir().to_string_lossy().into_owned();
        }
        if self.static_root.is_empty() {
            self.static_root = DEFAULT_STATIC.to_string();
        }
        if self.shared.is_empty() {
            self.shared = DEFAULT_SHARED.to_string();
        }
        if self.expire.is_zero() {
            self.expire = THIRTY_DAYS;
        }
        if self.max_age.is_zero() {
            self.max_age = THIRTY_DAYS;
        }
    }

    /// A non-default site that inherited the global static root gets its own folder under it.
    pub(crate) fn apply_site_defaults(&mut self, site: &str, global: &Config) {
        if !global.static_root.is_empty()
            && self.static_root == global.static_root
            && site != DEFAULT_SITE
        {
            self.static_root = Path::new(&global.static_root)
                .join(site)
                .to_string_lossy()
                .into_owned();
        }
    }

    /// Root of the files shared by every site.
    pub fn shared_root(&self) -> Option<PathBuf> {
        if self.static_root.is_empty() || self.shared.is_empty() {
            return None;
        }
        Some(Path::new(&self.static_root).join(&self.shared))
    }

    pub fn setting(&self) -> Map {
        self.setting.clone().unwrap_or_default()
    }

    pub fn has_tls(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}

/// Cross-origin policy applied by the `crossing` stage.
///
/// Each of method, origin and header may be given as a single value or a
/// list. A `*` anywhere, or an empty singular value, allows everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cross {
    pub allow: bool,
    pub method: String,
    #[serde(deserialize_with = "list")]
    pub methods: Vec<String>,
    pub origin: String,
    #[serde(deserialize_with = "list")]
    pub origins: Vec<String>,
    pub header: String,
    #[serde(deserialize_with = "list")]
    pub headers: Vec<String>,
}

impl Default for Cross {
    fn default() -> Self {
        Self {
            allow: true,
            method: String::new(),
            methods: Vec::new(),
            origin: String::new(),
            origins: Vec::new(),
            header: String::new(),
            headers: Vec::new(),
        }
    }
}

impl Cross {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that refuses every cross-origin request.
    pub fn disabled() -> Self {
        Self {
            allow: false,
            ..Self::default()
        }
    }

    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self.origin = self.origins.first().cloned().unwrap_or_default();
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self.method = self.methods.first().cloned().unwrap_or_default();
        self
    }

    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self.header = self.headers.first().cloned().unwrap_or_default();
        self
    }
}

/// Parse a duration given as seconds (`"90"`) or as unit groups (`"1h30m"`, `"7d"`, `"250ms"`).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<f64>() {
        return (secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86400.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += Duration::from_secs_f64(amount * scale);
    }
    Some(total)
}

mod duration {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Float(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Duration::ZERO),
            Some(Raw::Secs(secs)) => Ok(Duration::from_secs(secs)),
            Some(Raw::Float(secs)) if secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
            Some(Raw::Float(secs)) => Err(D::Error::custom(format!("negative duration {secs}"))),
            Some(Raw::Text(text)) => parse_duration(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid duration {text:?}"))),
        }
    }
}

fn list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.map(|v| string_list(&v)).unwrap_or_default())
}

fn first<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(list(deserializer)?.into_iter().next().unwrap_or_default())
}

// Environment variable loading
//
// `PREFIX_WEB__PORT=9000` becomes `{"web": {"port": 9000}}`: the prefix and
// one separating underscore are stripped, `__` nests, and keys are lowercased.

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::env;

/// Separator that opens a nested table in a variable name.
pub const NESTING: &str = "__";

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.map(|p| p.to_uppercase()),
        }
    }

    /// Load every matching variable as a nested table
    pub fn load(&self) -> Result<Map<String, Value>> {
        Ok(self.collect(env::vars()))
    }

    /// Build the nested table from `(name, value)` pairs.
    pub fn collect<I>(&self, vars: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = Map::new();
        for (key, value) in vars {
            let key = match &self.prefix {
                Some(prefix) => match key.to_uppercase().strip_prefix(prefix.as_str()) {
                    Some(rest) if rest.starts_with('_') => rest[1..].to_string(),
                    _ => continue,
                },
                None => key,
            };
            if key.is_empty() {
                continue;
            }
            insert_path(&mut table, &key.to_lowercase(), scalar(&value));
        }
        table
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Insert `value` under a `__`-separated path, creating tables on the way.
/// A scalar standing where a table is needed is replaced.
pub(crate) fn insert_path(table: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts = path.split(NESTING).filter(|p| !p.is_empty()).peekable();
    let mut current = table;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(next) => current = next,
            _ => return,
        }
    }
}

/// Booleans and numbers are typed; everything else stays a string.
pub(crate) fn scalar(text: &str) -> Value {
    let text = text.trim();
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = text.parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_and_nesting() {
        let loader = EnvLoader::new(Some("palisade".to_string()));
        let table = loader.collect(vars(&[
            ("PALISADE_WEB__PORT", "9000"),
            ("PALISADE_WEB__SITE__SHOP__DOMAIN", "shop.test"),
            ("PALISADE_CROSS__ALLOW", "false"),
            ("PALISADEX_IGNORED", "1"),
            ("OTHER", "x"),
        ]));

        assert_eq!(
            Value::Object(table),
            json!({
                "web": { "port": 9000, "site": { "shop": { "domain": "shop.test" } } },
                "cross": { "allow": false }
            })
        );
    }

    #[test]
    fn test_single_underscore_kept() {
        let loader = EnvLoader::new(Some("APP".to_string()));
        let table = loader.collect(vars(&[("APP_WEB__MAX_AGE", "1h")]));
        assert_eq!(table["web"]["max_age"], "1h");
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(scalar("true"), json!(true));
        assert_eq!(scalar("42"), json!(42));
        assert_eq!(scalar("1.5"), json!(1.5));
        assert_eq!(scalar("utf-8"), json!("utf-8"));
    }

    #[test]
    fn test_scalar_replaced_by_table() {
        let mut table = Map::new();
        insert_path(&mut table, "web", json!("flat"));
        insert_path(&mut table, "web__port", json!(1));
        assert_eq!(Value::Object(table), json!({ "web": { "port": 1 } }));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("PALISADE_TEST".to_string()));
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
    }
}

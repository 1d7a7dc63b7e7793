//! Argument schemas and the mapper that coerces request values into them.
//!
//! The `arguing` stage runs the route's [`Vars`] through an
//! [`ArgumentMapper`]; the reverse URL builder runs the same schema in pass
//! mode, where missing or malformed values are skipped instead of failing.

use crate::res::Res;
use crate::value::{Map, Value, display};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coercion target of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
    /// Passed through untouched
    Any,
}

/// One argument rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Var {
    #[serde(rename = "type")]
    pub kind: VarKind,
    pub required: bool,
    pub default: Option<Value>,
    pub name: String,
    pub desc: String,
}

impl Var {
    pub fn new(kind: VarKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::new(VarKind::String)
    }

    pub fn int() -> Self {
        Self::new(VarKind::Int)
    }

    pub fn float() -> Self {
        Self::new(VarKind::Float)
    }

    pub fn bool() -> Self {
        Self::new(VarKind::Bool)
    }

    pub fn any() -> Self {
        Self::new(VarKind::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn coerce(&self, value: &Value) -> Option<Value> {
        match self.kind {
            VarKind::Any => Some(value.clone()),
            VarKind::String => Some(Value::String(display(value))),
            VarKind::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            VarKind::Float => match value {
                Value::Number(n) => n.as_f64().map(Value::from),
                Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
                _ => None,
            },
            VarKind::Bool => match value {
                Value::Bool(_) => Some(value.clone()),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                    "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                    _ => None,
                },
                Value::Number(n) => n.as_i64().map(|n| Value::Bool(n != 0)),
                _ => None,
            },
        }
    }
}

/// Argument name to rule, iterated in name order.
pub type Vars = BTreeMap<String, Var>;

/// Coerces raw request values into typed arguments.
pub trait ArgumentMapper: Send + Sync {
    /// `nullable` lets required arguments be absent; `pass` skips every
    /// failure and returns whatever could be coerced.
    fn map(&self, vars: &Vars, values: &Map, nullable: bool, pass: bool) -> Result<Map, Res>;
}

/// Required check, default values and scalar coercion.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMapper;

impl ArgumentMapper for BasicMapper {
    fn map(&self, vars: &Vars, values: &Map, nullable: bool, pass: bool) -> Result<Map, Res> {
        let mut out = Map::new();

        for (key, var) in vars {
            let raw = values
                .get(key)
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .or(var.default.as_ref());

            let Some(raw) = raw else {
                if var.required && !nullable && !pass {
                    return Err(Res::required(label(key, var)));
                }
                continue;
            };

            match var.coerce(raw) {
                Some(value) => {
                    out.insert(key.clone(), value);
                }
                None if pass => {}
                None => return Err(Res::invalid(label(key, var))),
            }
        }

        Ok(out)
    }
}

fn label(key: &str, var: &Var) -> String {
    if var.name.is_empty() {
        key.to_string()
    } else {
        var.name.clone()
    }
}

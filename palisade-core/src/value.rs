// Loose request values shared by the pipeline stages

pub use serde_json::Value;

/// String-keyed bag used for params, query, form, uploads, locals and settings.
pub type Map = serde_json::Map<String, Value>;

/// Render a value the way it appears in a URL or a text body.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accepts a single string or a list of strings; empty entries are dropped.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// One value stays scalar, several become a list, none is absent.
pub(crate) fn collapse(mut values: Vec<Value>) -> Option<Value> {
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

/// Group `key=value` pairs by key, keeping first-seen key order.
pub(crate) fn group_pairs(pairs: Vec<(String, String)>) -> Vec<(String, Vec<Value>)> {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(Value::String(value)),
            None => grouped.push((key, vec![Value::String(value)])),
        }
    }
    grouped
}

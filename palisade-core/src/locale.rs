//! Language negotiation and message lookup.
//!
//! The `preprocessing` stage matches the request's Accept-Language header
//! against the registered [`Languages`]; result texts are produced by the
//! registered [`Localizer`].

use crate::value::{Value, display};
use std::cmp::Ordering;

/// Language code to the Accept-Language tags it answers for.
#[derive(Debug, Clone, Default)]
pub struct Languages {
    entries: Vec<(String, Vec<String>)>,
}

impl Languages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language; re-registering replaces its accept list.
    pub fn insert<I, S>(&mut self, lang: impl Into<String>, accepts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lang = lang.into();
        let accepts: Vec<String> = accepts.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(l, _)| *l == lang) {
            Some(entry) => entry.1 = accepts,
            None => self.entries.push((lang, accepts)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best registered language for an Accept-Language header.
    pub fn negotiate(&self, header: &str) -> Option<&str> {
        parse_accept_language(header).into_iter().find_map(|tag| {
            self.entries
                .iter()
                .find(|(_, accepts)| accepts.iter().any(|a| a.eq_ignore_ascii_case(&tag)))
                .map(|(lang, _)| lang.as_str())
        })
    }
}

struct AcceptEntry {
    tag: String,
    quality: f32,
}

/// Parse an Accept-Language header into tags, highest quality first.
///
/// Wildcards are dropped; equal qualities keep header order.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut entries: Vec<AcceptEntry> = header
        .split(',')
        .filter_map(|part| {
            let mut split = part.trim().splitn(2, ';');
            let tag = split.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }

            let quality = split
                .next()
                .and_then(|q| q.trim().strip_prefix("q="))
                .and_then(|q| q.parse().ok())
                .unwrap_or(1.0);

            Some(AcceptEntry {
                tag: tag.to_string(),
                quality,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
    entries.into_iter().map(|e| e.tag).collect()
}

/// Turns a result state key into display text.
pub trait Localizer: Send + Sync {
    fn string(&self, lang: Option<&str>, key: &str, args: &[Value]) -> String;
}

/// Returns the key itself with `{0}`, `{1}`, ... replaced by the arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyLocalizer;

impl Localizer for KeyLocalizer {
    fn string(&self, _lang: Option<&str>, key: &str, args: &[Value]) -> String {
        args.iter()
            .enumerate()
            .fold(key.to_string(), |text, (i, arg)| {
                text.replace(&format!("{{{i}}}"), &display(arg))
            })
    }
}

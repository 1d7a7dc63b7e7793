// MIME type lookup keyed by short type tags

/// Resolves a type tag (`"json"`, `"html"`, a file extension or a full
/// MIME string) to a MIME type.
pub trait MimeTypes: Send + Sync {
    fn lookup(&self, tag: &str) -> Option<String>;
}

/// Short tags used by the response encoder, then extension guessing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMimeTypes;

impl MimeTypes for DefaultMimeTypes {
    fn lookup(&self, tag: &str) -> Option<String> {
        let tag = tag.trim().trim_start_matches('.').to_lowercase();
        if tag.is_empty() {
            return None;
        }
        if tag.contains('/') {
            return Some(tag);
        }

        let known = match tag.as_str() {
            "text" | "txt" => Some("text/plain"),
            "html" | "htm" => Some("text/html"),
            "json" => Some("application/json"),
            "jsonp" | "script" | "js" => Some("application/javascript"),
            "xml" => Some("text/xml"),
            "file" | "binary" | "stream" => Some("application/octet-stream"),
            _ => None,
        };

        known
            .map(str::to_string)
            .or_else(|| mime_guess::from_ext(&tag).first().map(|m| m.to_string()))
    }
}

/// Look a tag up, falling back to `default` when the tag is unknown.
pub fn mimetype(mimes: &dyn MimeTypes, tag: &str, default: &str) -> String {
    mimes.lookup(tag).unwrap_or_else(|| default.to_string())
}

/// Types whose body is text and gets a `charset` parameter.
pub(crate) fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.ends_with("json")
        || mime.ends_with("javascript")
        || mime.ends_with("xml")
}

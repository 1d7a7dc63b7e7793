// Static file lookup under a site's asset root

use std::path::{Path, PathBuf};

/// Clean a request path into segments relative to a root.
///
/// `.` and empty segments are dropped and `..` pops a segment without ever
/// climbing above the root. Returns `None` for segments that could name
/// something outside the root on another platform.
fn clean_path(request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| request_path.to_string());

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s if s.contains('\\') || s.contains('\0') || s.contains(':') => return None,
            s => segments.push(s),
        }
    }
    Some(segments.iter().collect())
}

/// Resolve a request path to a file under `root`.
///
/// A directory resolves to its first existing default document.
pub fn resolve_static_file(root: &Path, request_path: &str, defaults: &[String]) -> Option<PathBuf> {
    if root.as_os_str().is_empty() {
        return None;
    }

    let target = root.join(clean_path(request_path)?);
    let metadata = std::fs::metadata(&target).ok()?;
    if metadata.is_dir() {
        return defaults
            .iter()
            .map(|doc| target.join(doc))
            .find(|doc| doc.is_file());
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn defaults() -> Vec<String> {
        vec!["index.html".to_string(), "default.html".to_string()]
    }

    #[test]
    fn test_resolve_file_and_default_document() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("docs")).unwrap();
        fs::write(root.path().join("app.css"), "body{}").unwrap();
        fs::write(root.path().join("docs/default.html"), "<p>docs</p>").unwrap();

        assert_eq!(
            resolve_static_file(root.path(), "/app.css", &defaults()),
            Some(root.path().join("app.css"))
        );
        assert_eq!(
            resolve_static_file(root.path(), "/docs/", &defaults()),
            Some(root.path().join("docs/default.html"))
        );
        assert_eq!(resolve_static_file(root.path(), "/missing.js", &defaults()), None);
    }

    #[test]
    fn test_no_escape_from_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("public");
        fs::create_dir_all(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "nope").unwrap();
        fs::write(root.join("secret.txt"), "public").unwrap();

        assert_eq!(
            resolve_static_file(&root, "/../secret.txt", &defaults()),
            Some(root.join("secret.txt"))
        );
        assert_eq!(
            resolve_static_file(&root, "/%2e%2e/%2e%2e/secret.txt", &defaults()),
            Some(root.join("secret.txt"))
        );
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(resolve_static_file(Path::new(""), "/index.html", &defaults()), None);
    }
}

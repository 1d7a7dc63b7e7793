//! Response encoding tests.

use bytes::Bytes;
use http::{Request, Response};
use palisade_core::*;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn get(uri: &str) -> Request<Bytes> {
    Request::builder()
        .uri(uri)
        .header("host", "example.com")
        .body(Bytes::new())
        .unwrap()
}

fn text(response: &Response<Bytes>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}

fn header<'a>(response: &'a Response<Bytes>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Serve a single route whose action is `action`.
fn serve<F>(config: Config, action: F) -> Response<Bytes>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    let mut builder = Registry::builder();
    builder.configure(config);
    builder.register_route("out", Route::new("/out").action(action));
    builder.build().serve("default.out.*", Map::new(), get("/out"))
}

struct TrackedReader {
    inner: std::io::Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

struct FailingReader {
    dropped: Arc<AtomicBool>,
}

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("broken pipe"))
    }
}

impl Drop for FailingReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_json_payload() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.json(&serde_json::json!({"ok": true}));
    });
    assert_eq!(response.status(), 200);
    assert_eq!(text(&response), r#"{"ok":true}"#);
    assert_eq!(
        header(&response, "content-type"),
        Some("application/json; charset=utf-8")
    );
}

#[test]
fn test_json_encode_failure_is_500() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        ctx.json(&bad);
    });
    assert_eq!(response.status(), 500);
    assert_eq!(header(&response, "content-type"), Some("text/plain; charset=utf-8"));
    assert!(text(&response).contains("key must be a string"));
}

#[test]
fn test_jsonp_payload() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.jsonp("callback", &serde_json::json!([1, 2]));
    });
    assert_eq!(text(&response), "callback([1,2]);");
    assert_eq!(
        header(&response, "content-type"),
        Some("application/javascript; charset=utf-8")
    );
}

#[test]
fn test_redirect() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.redirect("/login");
    });
    assert_eq!(response.status(), 302);
    assert_eq!(header(&response, "location"), Some("/login"));
}

#[test]
fn test_status_without_text_uses_reason_phrase() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.status(418, None);
    });
    assert_eq!(response.status(), 418);
    assert_eq!(text(&response), "I'm a teapot");
}

#[test]
fn test_no_payload_is_not_found() {
    let response = serve(Config::new(), |_: &mut Context| {});
    assert_eq!(response.status(), 404);
    assert_eq!(text(&response), "Not Found");
}

#[test]
fn test_code_without_payload_writes_reason() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.set_code(204);
    });
    assert_eq!(response.status(), 204);
}

#[test]
fn test_custom_type_and_charset() {
    let response = serve(Config::new().with_charset("gbk"), |ctx: &mut Context| {
        ctx.set_type("xml").text("<a/>");
    });
    assert_eq!(header(&response, "content-type"), Some("text/xml; charset=gbk"));
}

#[test]
fn test_cookie_attributes_follow_site_policy() {
    let config = Config::new()
        .with_http_only(true)
        .with_max_age(Duration::from_secs(3600));
    let response = serve(config, |ctx: &mut Context| {
        ctx.set_cookie("theme", "dark").remove_cookie("old").text("ok");
    });

    let cookies: Vec<&str> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert_eq!(cookies.len(), 2);

    let theme = cookies.iter().find(|c| c.starts_with("theme=")).unwrap();
    assert!(theme.contains("Path=/"));
    assert!(theme.contains("HttpOnly"));
    assert!(theme.contains("Max-Age=3600"));

    let old = cookies.iter().find(|c| c.starts_with("old=")).unwrap();
    assert!(old.contains("Max-Age=0"));
    assert!(old.contains("Path=/"));
}

#[test]
fn test_replacing_payload_follows_new_type() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.json(&serde_json::json!({"partial": true}));
        ctx.error(Res::error("boom"));
    });
    assert_eq!(response.status(), 500);
    assert_eq!(text(&response), "Internal Server Error");
    assert_eq!(header(&response, "content-type"), Some("text/plain; charset=utf-8"));

    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.set_type("xml").json(&serde_json::json!(1));
        ctx.text("<a/>");
    });
    assert_eq!(header(&response, "content-type"), Some("text/xml; charset=utf-8"));
}

#[test]
fn test_binary_attachment() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        ctx.binary(vec![0u8, 1, 2]).attachment("report 1.bin");
    });
    assert_eq!(response.body().as_ref(), &[0u8, 1, 2]);
    assert_eq!(header(&response, "content-type"), Some("application/octet-stream"));
    assert_eq!(
        header(&response, "content-disposition"),
        Some("attachment; filename=report%201.bin;")
    );
}

#[test]
fn test_file_payload_and_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, r#"{"a":1}"#).unwrap();

    let file = path.clone();
    let response = serve(Config::new(), move |ctx: &mut Context| {
        ctx.file(file.clone());
    });
    assert_eq!(response.status(), 200);
    assert_eq!(text(&response), r#"{"a":1}"#);
    assert_eq!(
        header(&response, "content-type"),
        Some("application/json; charset=utf-8")
    );

    let missing = dir.path().join("missing.txt");
    let response = serve(Config::new(), move |ctx: &mut Context| {
        ctx.file(missing.clone());
    });
    assert_eq!(response.status(), 404);
}

#[test]
fn test_buffer_copied_and_dropped() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();

    let response = serve(Config::new(), move |ctx: &mut Context| {
        let reader = TrackedReader {
            inner: std::io::Cursor::new(b"streamed".to_vec()),
            dropped: flag.clone(),
        };
        ctx.buffer(reader, Some(8)).attachment("out.txt");
    });

    assert_eq!(text(&response), "streamed");
    assert_eq!(header(&response, "content-length"), Some("8"));
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_failed_buffer_still_dropped() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();

    let response = serve(Config::new(), move |ctx: &mut Context| {
        ctx.buffer(FailingReader { dropped: flag.clone() }, Some(100));
    });

    assert!(header(&response, "content-length").is_none());
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_replaced_buffer_is_dropped() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();

    let response = serve(Config::new(), move |ctx: &mut Context| {
        let reader = TrackedReader {
            inner: std::io::Cursor::new(Vec::new()),
            dropped: flag.clone(),
        };
        ctx.buffer(reader, None);
        assert!(!flag.load(Ordering::SeqCst));
        ctx.text("replaced");
        assert!(flag.load(Ordering::SeqCst));
    });

    assert_eq!(text(&response), "replaced");
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_large_buffer_left_for_streaming() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let size = STREAM_THRESHOLD as usize + 10;

    let response = serve(Config::new(), move |ctx: &mut Context| {
        let reader = TrackedReader {
            inner: std::io::Cursor::new(vec![b'a'; size]),
            dropped: flag.clone(),
        };
        ctx.buffer(reader, None);
    });

    assert!(response.body().is_empty());
    assert!(response.extensions().get::<Streamed>().is_some());
    assert!(header(&response, "content-length").is_none());
    assert!(!dropped.load(Ordering::SeqCst));

    let response = buffer_streamed(response).unwrap();
    assert_eq!(response.body().len(), size);
    assert!(response.extensions().get::<Streamed>().is_none());
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_large_file_left_for_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    let size = STREAM_THRESHOLD as usize + 1;
    std::fs::write(&path, vec![1u8; size]).unwrap();

    let response = serve(Config::new(), move |ctx: &mut Context| {
        ctx.file(path.clone());
    });

    assert_eq!(response.status(), 200);
    assert!(response.body().is_empty());
    let expected = size.to_string();
    assert_eq!(header(&response, "content-length"), Some(expected.as_str()));
    assert!(header(&response, "last-modified").is_some());

    let response = buffer_streamed(response).unwrap();
    assert_eq!(response.body().len(), size);
}

#[test]
fn test_echo_envelope() {
    let response = serve(Config::new(), |ctx: &mut Context| {
        let mut data = Map::new();
        data.insert("id".into(), Value::from(7));
        ctx.echo(&Res::ok(), Some(data));
    });

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["code"], 0);
    assert_eq!(body["text"], "ok");
    assert_eq!(body["data"]["id"], 7);
    assert!(body["time"].as_u64().unwrap() > 0);
}

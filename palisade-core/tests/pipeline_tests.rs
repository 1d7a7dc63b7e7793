//! Request pipeline tests, driven through `Registry::serve`.

use bytes::Bytes;
use http::{Request, Response};
use palisade_core::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn request(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "example.com")
}

fn get(uri: &str) -> Request<Bytes> {
    request("GET", uri).body(Bytes::new()).unwrap()
}

fn text(response: &Response<Bytes>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}

fn header<'a>(response: &'a Response<Bytes>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn params(value: serde_json::Value) -> Map {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

type Trace = Arc<Mutex<Vec<String>>>;

fn tracer(trace: &Trace, label: &'static str) -> impl Fn(&mut Context) + Send + Sync + 'static {
    let trace = trace.clone();
    move |ctx: &mut Context| {
        trace.lock().unwrap().push(label.to_string());
        ctx.next();
    }
}

#[test]
fn test_route_action_runs() {
    let mut builder = Registry::builder();
    builder.register_route(
        "hello",
        Route::new("/hello").action(|ctx: &mut Context| {
            ctx.text("hello world");
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.hello.*", Map::new(), get("/hello"));
    assert_eq!(response.status(), 200);
    assert_eq!(text(&response), "hello world");
    assert_eq!(header(&response, "content-type"), Some("text/plain; charset=utf-8"));
}

#[test]
fn test_path_params_and_query_reach_args() {
    let mut builder = Registry::builder();
    builder.register_route(
        "user",
        Route::new("/users/{id}")
            .arg("id", Var::int().required())
            .arg("tab", Var::string().default_value("overview"))
            .action(|ctx: &mut Context| {
                let args = ctx.args.clone();
                ctx.json(&args);
            }),
    );
    let registry = builder.build();

    let response = registry.serve(
        "default.user.*",
        params(json!({"id": "42"})),
        get("/users/42?tab=posts"),
    );
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({"id": 42, "tab": "posts"}));
}

#[test]
fn test_failed_arguments_never_reach_action() {
    let reached = Arc::new(Mutex::new(false));
    let flag = reached.clone();

    let mut builder = Registry::builder();
    builder.register_route(
        "user",
        Route::new("/users").arg("id", Var::int().required()).action(
            move |ctx: &mut Context| {
                *flag.lock().unwrap() = true;
                ctx.text("unreachable");
            },
        ),
    );
    let registry = builder.build();

    let response = registry.serve("default.user.*", Map::new(), get("/users"));
    assert_eq!(response.status(), 400);
    assert_eq!(text(&response), "Bad Request");
    assert!(!*reached.lock().unwrap());
}

#[test]
fn test_failed_handler_sees_result() {
    let mut builder = Registry::builder();
    builder.register_route(
        "user",
        Route::new("/users")
            .arg("id", Var::int().required())
            .action(|ctx: &mut Context| {
                ctx.text("unreachable");
            }),
    );
    builder.register_handler(
        "api",
        Handler::new().failed(|ctx: &mut Context| {
            let res = ctx.result().cloned().unwrap_or_default();
            ctx.echo(&res, None);
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.user.*", Map::new(), get("/users?id=abc"));
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["code"], 400);
    assert_eq!(body["text"], "invalid");
}

#[test]
fn test_stage_ordering_across_levels() {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));

    let mut builder = Registry::builder();
    builder.register_filter(
        "audit",
        Filter::new()
            .serve(tracer(&trace, "serve"))
            .request(tracer(&trace, "request"))
            .execute(tracer(&trace, "execute"))
            .response(tracer(&trace, "response")),
    );
    let actions = trace.clone();
    builder.register_route(
        "index",
        Route::new("/")
            .then(tracer(&trace, "first"))
            .action(move |ctx: &mut Context| {
                actions.lock().unwrap().push("action".to_string());
                ctx.text("done");
            }),
    );
    let registry = builder.build();

    let response = registry.serve("default.index.*", Map::new(), get("/"));
    assert_eq!(text(&response), "done");
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["serve", "request", "execute", "first", "action", "response"]
    );
}

#[test]
fn test_halting_stage_does_not_stop_parent_level() {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));

    let mut builder = Registry::builder();
    let halted = trace.clone();
    builder.register_filter(
        "gate",
        Filter::new()
            .execute(move |ctx: &mut Context| {
                halted.lock().unwrap().push("gate".to_string());
                ctx.status(403, Some("closed"));
            })
            .response(tracer(&trace, "response")),
    );
    let action = trace.clone();
    builder.register_route(
        "index",
        Route::new("/").action(move |ctx: &mut Context| {
            action.lock().unwrap().push("action".to_string());
            ctx.text("open");
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.index.*", Map::new(), get("/"));
    assert_eq!(response.status(), 403);
    assert_eq!(text(&response), "closed");
    assert_eq!(*trace.lock().unwrap(), vec!["gate", "response"]);
}

#[test]
fn test_enqueued_stage_runs_in_current_queue() {
    let mut builder = Registry::builder();
    builder.register_route(
        "index",
        Route::new("/").action(|ctx: &mut Context| {
            ctx.enqueue(stage(|ctx: &mut Context| {
                ctx.text("from enqueued stage");
            }));
            ctx.next();
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.index.*", Map::new(), get("/"));
    assert_eq!(text(&response), "from enqueued stage");
}

#[test]
fn test_terminal_chain_order() {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));

    let mut builder = Registry::builder();
    builder.register_handler("first", Handler::new().error(tracer(&trace, "site-first")));
    builder.register_handler("second", Handler::new().error(tracer(&trace, "site-second")));
    builder.register_route(
        "boom",
        Route::new("/boom")
            .action(|ctx: &mut Context| ctx.error(Res::error("boom")))
            .on_error(tracer(&trace, "route")),
    );
    let registry = builder.build();

    let response = registry.serve("default.boom.*", Map::new(), get("/boom"));
    assert_eq!(response.status(), 500);
    assert_eq!(text(&response), "Internal Server Error");
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["route", "site-first", "site-second"]
    );
}

#[test]
fn test_handler_can_end_terminal_chain() {
    let mut builder = Registry::builder();
    builder.register_handler(
        "pretty",
        Handler::new().found(|ctx: &mut Context| {
            ctx.html("<h1>Nothing here</h1>");
        }),
    );
    let registry = builder.build();

    let response = registry.serve("", Map::new(), get("/missing"));
    assert_eq!(response.status(), 404);
    assert_eq!(text(&response), "<h1>Nothing here</h1>");
    assert_eq!(header(&response, "content-type"), Some("text/html; charset=utf-8"));
}

#[test]
fn test_denied_without_session() {
    let mut builder = Registry::builder();
    builder.set_verifier(Arc::new(|token: &str| {
        (token == "good").then(|| Session::authed(token))
    }));
    builder.register_route(
        "me",
        Route::new("/me").auth(true).action(|ctx: &mut Context| {
            let token = ctx.session().map(|s| s.token.clone()).unwrap_or_default();
            ctx.text(token);
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.me.*", Map::new(), get("/me"));
    assert_eq!(response.status(), 401);

    let authorized = request("GET", "/me")
        .header("authorization", "Bearer good")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("default.me.*", Map::new(), authorized);
    assert_eq!(response.status(), 200);
    assert_eq!(text(&response), "good");
}

#[test]
fn test_cors_preflight() {
    let mut builder = Registry::builder();
    builder.set_cross(
        Cross::new()
            .with_origins(["https://x.test"])
            .with_methods(["POST"]),
    );
    builder.register_route(
        "api",
        Route::new("/api").action(|ctx: &mut Context| {
            ctx.text("api");
        }),
    );
    let registry = builder.build();

    let preflight = request("OPTIONS", "/api")
        .header("origin", "https://x.test")
        .header("access-control-request-method", "POST")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("default.api.*", Map::new(), preflight);
    assert_eq!(response.status(), 200);
    assert_eq!(header(&response, "access-control-allow-origin"), Some("https://x.test"));
    assert_eq!(header(&response, "access-control-allow-methods"), Some("POST"));
    assert_eq!(text(&response), "cross domain access allowed.");

    let simple = request("POST", "/api")
        .header("origin", "https://x.test")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("default.api.*", Map::new(), simple);
    assert_eq!(text(&response), "api");
    assert_eq!(header(&response, "access-control-allow-origin"), Some("https://x.test"));

    let foreign = request("POST", "/api")
        .header("origin", "https://evil.test")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("default.api.*", Map::new(), foreign);
    assert_eq!(text(&response), "api");
    assert!(header(&response, "access-control-allow-origin").is_none());
}

#[test]
fn test_json_and_form_bodies() {
    let mut builder = Registry::builder();
    builder.register_route(
        "echo",
        Route::new("/echo").action(|ctx: &mut Context| {
            let form = ctx.form.clone();
            ctx.json(&form);
        }),
    );
    let registry = builder.build();

    let json_body = request("POST", "/echo")
        .header("content-type", "application/json")
        .body(Bytes::from_static(br#"{"name":"ada","tags":["a","b"]}"#))
        .unwrap();
    let response = registry.serve("default.echo.*", Map::new(), json_body);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({"name": "ada", "tags": ["a", "b"]}));

    let form_body = request("POST", "/echo")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Bytes::from_static(b"name=ada&tag=a&tag=b"))
        .unwrap();
    let response = registry.serve("default.echo.*", Map::new(), form_body);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({"name": "ada", "tag": ["a", "b"]}));
}

#[test]
fn test_upload_files_removed_after_response() {
    let uploads = tempfile::tempdir().unwrap();
    let seen: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();

    let mut builder = Registry::builder();
    builder.configure(Config::new().with_upload(uploads.path().to_string_lossy()));
    builder.register_route(
        "upload",
        Route::new("/upload").action(move |ctx: &mut Context| {
            let paths: Vec<PathBuf> = ctx.upload_paths().map(|p| p.to_path_buf()).collect();
            for path in &paths {
                assert!(path.exists());
            }
            record.lock().unwrap().extend(paths);
            let upload = ctx.upload.clone();
            ctx.json(&upload);
        }),
    );
    let registry = builder.build();

    let body = concat!(
        "--XBOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
        "report\r\n",
        "--XBOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n",
        "Content-Type: text/plain\r\n\r\n",
        "hello upload\r\n",
        "--XBOUNDARY--\r\n",
    );
    let upload = request("POST", "/upload")
        .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
        .body(Bytes::from_static(body.as_bytes()))
        .unwrap();

    let response = registry.serve("default.upload.*", Map::new(), upload);
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["file"]["name"], "notes.txt");
    assert_eq!(body["file"]["type"], "txt");
    assert_eq!(body["file"]["size"], 12);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with(uploads.path()));
    assert!(!seen[0].exists());
}

#[test]
fn test_large_upload_written_whole_and_empty_part_skipped() {
    let uploads = tempfile::tempdir().unwrap();
    let content = "0123456789".repeat(20_000);
    let expected = content.clone();

    let mut builder = Registry::builder();
    builder.configure(Config::new().with_upload(uploads.path().to_string_lossy()));
    builder.register_route(
        "upload",
        Route::new("/upload").action(move |ctx: &mut Context| {
            let path = ctx.upload["big"]["file"].as_str().unwrap_or_default().to_string();
            let written = std::fs::read_to_string(&path).unwrap_or_default();
            assert_eq!(written, expected);
            let upload = ctx.upload.clone();
            ctx.json(&upload);
        }),
    );
    let registry = builder.build();

    let body = format!(
        concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"big\"; filename=\"big.log\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "{}\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"empty\"; filename=\"none.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "\r\n",
            "--XBOUNDARY--\r\n",
        ),
        content
    );
    let upload = request("POST", "/upload")
        .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
        .body(Bytes::from(body))
        .unwrap();

    let response = registry.serve("default.upload.*", Map::new(), upload);
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["big"]["size"], 200_000);
    assert_eq!(body["big"]["type"], "log");
    assert!(body.get("empty").is_none());
    assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 0);
}

#[test]
fn test_static_fallback_and_not_found() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("app.css"), "body{}").unwrap();

    let mut builder = Registry::builder();
    builder.configure(Config::new().with_static_root(root.path().to_string_lossy()));
    let registry = builder.build();

    let response = registry.serve("", Map::new(), get("/app.css"));
    assert_eq!(response.status(), 200);
    assert_eq!(text(&response), "body{}");
    assert_eq!(header(&response, "content-type"), Some("text/css; charset=utf-8"));
    assert!(header(&response, "last-modified").is_some());

    let response = registry.serve("", Map::new(), get("/missing.css"));
    assert_eq!(response.status(), 404);
    assert_eq!(text(&response), "Not Found");
}

#[test]
fn test_site_selected_by_host() {
    let mut builder = Registry::builder();
    builder.configure_site("blog", Config::new().with_domain("blog.test"));
    builder.register_route(
        "blog.home",
        Route::new("/").action(|ctx: &mut Context| {
            let site = ctx.site().name().to_string();
            ctx.text(site);
        }),
    );
    builder.register_handler(
        "*.missing",
        Handler::new().found(|ctx: &mut Context| {
            let site = ctx.site().name().to_string();
            ctx.text(format!("missing on {site}"));
        }),
    );
    let registry = builder.build();

    let response = registry.serve("blog.home.*", Map::new(), get("/"));
    assert_eq!(text(&response), "blog");

    let miss = Request::builder()
        .uri("/nothing")
        .header("host", "blog.test:8080")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("", Map::new(), miss);
    assert_eq!(text(&response), "missing on blog");

    let response = registry.serve("", Map::new(), get("/nothing"));
    assert_eq!(text(&response), "missing on default");
}

#[test]
fn test_language_from_accept_language() {
    let mut builder = Registry::builder();
    builder.register_language("zh-cn", ["zh-cn", "zh"]);
    builder.register_language("en", ["en", "en-us"]);
    builder.register_route(
        "lang",
        Route::new("/lang").action(|ctx: &mut Context| {
            let lang = ctx.language().unwrap_or("none").to_string();
            ctx.text(lang);
        }),
    );
    let registry = builder.build();

    let localized = request("GET", "/lang")
        .header("accept-language", "fr;q=0.9, zh;q=0.8, en;q=0.5")
        .body(Bytes::new())
        .unwrap();
    let response = registry.serve("default.lang.*", Map::new(), localized);
    assert_eq!(text(&response), "zh-cn");
}

#[test]
fn test_url_bound_to_request() {
    let mut builder = Registry::builder();
    builder.configure_site("shop", Config::new().with_domain("shop.test"));
    builder.register_route("shop.item", Route::new("/items/{id}").action(|_: &mut Context| {}));
    builder.register_route(
        "links",
        Route::new("/links").action(|ctx: &mut Context| {
            let values = params(json!({"{id}": 9}));
            let link = ctx.url().route("shop.item", &values);
            ctx.text(link);
        }),
    );
    let registry = builder.build();

    let response = registry.serve("default.links.*", Map::new(), get("/links"));
    assert_eq!(text(&response), "http://shop.test:8080/items/9");
}

//! Per-request context and the stage cursor.
//!
//! Every request gets its own [`Context`]. Stages run strictly in queue
//! order: [`Context::next`] invokes the next queued stage, and a stage that
//! returns without calling it ends its queue. Each pipeline level runs in
//! its own cursor frame through [`Context::run_chain`], so a nested chain
//! that stops early hands control back to the level that started it.

use crate::args::ArgumentMapper;
use crate::config::Config;
use crate::driver::RemoteAddr;
use crate::encoder;
use crate::host::normalize_host;
use crate::payload::Payload;
use crate::pipeline::Outcome;
use crate::registry::{Registry, Site};
use crate::res::Res;
use crate::route::Stage;
use crate::security::Session;
use crate::table::{RouteConfig, RouteRecord};
use crate::url::Url;
use crate::value::Map;
use bytes::Bytes;
use cookie::Cookie;
use http::header::{COOKIE, HOST, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method, Request, Response};
use serde::Serialize;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tracing::warn;

#[derive(Default)]
struct Cursor {
    stages: Vec<Stage>,
    index: usize,
}

/// State of one request as it moves through the pipeline.
pub struct Context {
    registry: Arc<Registry>,
    site: Arc<Site>,
    request: Request<Bytes>,
    route: Option<Arc<RouteConfig>>,
    cursor: Cursor,

    /// Route key (`user.get`), empty when no route matched.
    pub name: String,
    pub setting: Map,

    pub method: Method,
    pub host: String,
    pub path: String,
    pub uri: String,

    pub ajax: bool,
    language: Option<String>,
    session: Option<Session>,

    pub params: Map,
    pub query: Map,
    pub form: Map,
    pub upload: Map,
    /// Params, query, form and uploads merged.
    pub value: Map,
    /// Values coerced through the route's argument schema.
    pub args: Map,
    pub locals: Map,
    pub data: Map,
    /// Raw body when it was neither JSON nor a form.
    pub body: Option<String>,

    /// Response status; 0 means unset.
    pub code: u16,
    /// Type tag or MIME type of the response.
    pub kind: String,
    charset: String,
    payload: Option<Payload>,
    headers: HeaderMap,
    cookies: Vec<Cookie<'static>>,
    result: Option<Res>,

    uploads: Vec<TempPath>,
    encoded: Option<Response<Bytes>>,
}

impl Context {
    pub(crate) fn new(
        registry: Arc<Registry>,
        site: Arc<Site>,
        record: Option<&RouteRecord>,
        params: Map,
        request: Request<Bytes>,
    ) -> Self {
        let host = request
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().host())
            .map(normalize_host)
            .unwrap_or_default();
        let uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        let route = record.map(|r| r.config.clone());
        let charset = site.config().charset.clone();

        Self {
            name: record.map(|r| r.key.clone()).unwrap_or_default(),
            setting: route.as_ref().map(|r| r.setting.clone()).unwrap_or_default(),
            method: request.method().clone(),
            host,
            path: request.uri().path().to_string(),
            uri,
            ajax: false,
            language: None,
            session: None,
            params,
            query: Map::new(),
            form: Map::new(),
            upload: Map::new(),
            value: Map::new(),
            args: Map::new(),
            locals: Map::new(),
            data: Map::new(),
            body: None,
            code: 0,
            kind: String::new(),
            charset,
            payload: None,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            result: None,
            uploads: Vec::new(),
            encoded: None,
            registry,
            site,
            request,
            route,
            cursor: Cursor::default(),
        }
    }

    // ========== Pipeline ==========

    /// Run the next stage of the current queue; a no-op past the end.
    pub fn next(&mut self) {
        let Some(stage) = self.cursor.stages.get(self.cursor.index).cloned() else {
            return;
        };
        self.cursor.index += 1;
        stage(self);
    }

    /// Append a stage to the current queue.
    pub fn enqueue(&mut self, stage: Stage) {
        self.cursor.stages.push(stage);
    }

    /// Run `stages` in a fresh cursor frame, then restore the caller's.
    pub fn run_chain(&mut self, stages: Vec<Stage>) {
        let saved = std::mem::replace(
            &mut self.cursor,
            Cursor {
                stages,
                index: 0,
            },
        );
        self.next();
        self.cursor = saved;
    }

    /// Run the not-found chain.
    pub fn found(&mut self) {
        self.terminal(Outcome::Found);
    }

    /// Run the error chain with `res` attached.
    pub fn error(&mut self, res: Res) {
        self.result = Some(res);
        self.terminal(Outcome::Error);
    }

    /// Run the bad-request chain with `res` attached.
    pub fn failed(&mut self, res: Res) {
        self.result = Some(res);
        self.terminal(Outcome::Failed);
    }

    /// Run the denied chain with `res` attached.
    pub fn denied(&mut self, res: Res) {
        self.result = Some(res);
        self.terminal(Outcome::Denied);
    }

    pub(crate) fn terminal(&mut self, outcome: Outcome) {
        if self.code == 0 {
            self.code = outcome.status();
        }
        let chain = self.site.terminal_chain(outcome, self.route.as_deref());
        self.run_chain(chain);
    }

    // ========== Request ==========

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        self.site.config()
    }

    /// Resolved route configuration, `None` for static files and misses.
    pub fn route(&self) -> Option<&RouteConfig> {
        self.route.as_deref()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    /// Request cookie value.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }

    /// Client address: X-Forwarded-For, X-Real-IP, then the peer address.
    pub fn ip(&self) -> String {
        let raw = self
            .header("x-forwarded-for")
            .or_else(|| self.header("x-real-ip"))
            .map(str::to_string)
            .or_else(|| {
                self.request
                    .extensions()
                    .get::<RemoteAddr>()
                    .map(|addr| addr.0.to_string())
            })
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let raw = raw
            .parse::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or(raw);

        raw.rsplit(',')
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }

    pub fn agent(&self) -> Option<&str> {
        self.request
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
    }

    // ========== Session ==========

    /// Verify a token with the registered verifier and keep the session.
    pub fn verify(&mut self, token: &str) -> bool {
        let session = self
            .registry
            .verifier()
            .and_then(|verifier| verifier.verify(token));
        let verified = session.is_some();
        self.session = session;
        verified
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn signed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.signed)
    }

    pub fn authed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.authed)
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn set_language(&mut self, lang: impl Into<String>) {
        self.language = Some(lang.into());
    }

    /// Localized text for a result.
    pub fn string(&self, res: &Res) -> String {
        self.registry
            .localizer()
            .string(self.language.as_deref(), res.state(), res.args())
    }

    pub fn result(&self) -> Option<&Res> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, res: Res) {
        self.result = Some(res);
    }

    pub(crate) fn mapper(&self) -> &dyn ArgumentMapper {
        self.registry.mapper()
    }

    /// Reverse URL builder bound to this request's site and route.
    pub fn url(&self) -> Url<'_> {
        Url::bound(&self.registry, self.site.name(), &self.name)
    }

    // ========== Output ==========

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.code = code;
        self
    }

    /// Set the response type tag (`json`, `html`, an extension) or MIME type.
    pub fn set_type(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = kind.into();
        self
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) -> &mut Self {
        let charset = charset.into();
        if !charset.is_empty() {
            self.charset = charset;
        }
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(name, "Dropping invalid response header"),
        }
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Queue a response cookie; path, HttpOnly and Max-Age come from the site.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put_cookie(Cookie::new(name.into(), value.into()))
    }

    /// Expire a cookie on the client.
    pub fn remove_cookie(&mut self, name: impl Into<String>) -> &mut Self {
        let mut cookie = Cookie::new(name.into(), String::new());
        cookie.set_max_age(cookie::time::Duration::ZERO);
        self.put_cookie(cookie)
    }

    fn put_cookie(&mut self, cookie: Cookie<'static>) -> &mut Self {
        self.cookies.retain(|c| c.name() != cookie.name());
        self.cookies.push(cookie);
        self
    }

    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub(crate) fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    /// A type tag that only came from the replaced payload follows the new one;
    /// one set through [`Context::set_type`] stays.
    fn set_payload(&mut self, payload: Payload) -> &mut Self {
        let derived = self.payload.as_ref().map(Payload::default_kind);
        if self.kind.is_empty() || derived == Some(self.kind.as_str()) {
            self.kind = payload.default_kind().to_string();
        }
        // Replacing drops the previous payload, closing any open reader.
        self.payload = Some(payload);
        self
    }

    pub fn redirect(&mut self, url: impl Into<String>) -> &mut Self {
        self.payload = Some(Payload::Redirect(url.into()));
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.set_payload(Payload::Text(text.into()))
    }

    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.set_payload(Payload::Html(html.into()))
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        let value = serde_json::to_value(value).map_err(|e| e.to_string());
        self.set_payload(Payload::Json(value))
    }

    pub fn jsonp<T: Serialize + ?Sized>(&mut self, callback: impl Into<String>, value: &T) -> &mut Self {
        let value = serde_json::to_value(value).map_err(|e| e.to_string());
        self.set_payload(Payload::Jsonp {
            callback: callback.into(),
            value,
        })
    }

    pub fn file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.set_payload(Payload::File {
            path: path.into(),
            name: None,
        })
    }

    pub fn binary(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.set_payload(Payload::Binary {
            bytes: bytes.into(),
            name: None,
        })
    }

    /// Stream a reader; `size` becomes Content-Length when known.
    pub fn buffer<R>(&mut self, reader: R, size: Option<u64>) -> &mut Self
    where
        R: Read + Send + 'static,
    {
        self.set_payload(Payload::Buffer {
            reader: Box::new(reader),
            size,
            name: None,
        })
    }

    /// Send the current file, binary or buffer payload as a named download.
    pub fn attachment(&mut self, name: impl Into<String>) -> &mut Self {
        if let Some(slot) = self.payload.as_mut().and_then(Payload::name_mut) {
            *slot = Some(name.into());
        }
        self
    }

    /// Bare status; without text the reason phrase is written.
    pub fn status(&mut self, code: u16, text: Option<&str>) -> &mut Self {
        self.code = code;
        self.set_payload(Payload::Status(text.map(str::to_string)))
    }

    /// API envelope for `res`, with `data` merged over the context's data.
    pub fn echo(&mut self, res: &Res, data: Option<Map>) -> &mut Self {
        if res.is_ok() {
            self.code = 200;
        } else if self.code == 0 {
            self.code = 500;
        }

        self.data.extend(data.unwrap_or_default());
        let text = self.string(res);
        let data = (!self.data.is_empty()).then(|| self.data.clone());

        self.kind = "json".to_string();
        self.payload = Some(Payload::Echo {
            code: res.code(),
            text: (!text.is_empty()).then_some(text),
            data,
        });
        self
    }

    // ========== Uploads ==========

    /// Create a uniquely named temp file in the site's upload directory.
    pub(crate) fn upload_file(&self, ext: &str) -> std::io::Result<NamedTempFile> {
        let suffix = if ext.is_empty() {
            String::new()
        } else {
            format!(".{ext}")
        };
        let dir = &self.site.config().upload;
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload_").suffix(&suffix);
        if dir.is_empty() {
            builder.tempfile()
        } else {
            builder.tempfile_in(dir)
        }
    }

    /// Keep an upload until the context is dropped.
    pub(crate) fn keep_upload(&mut self, path: TempPath) -> PathBuf {
        let kept = path.to_path_buf();
        self.uploads.push(path);
        kept
    }

    pub fn upload_paths(&self) -> impl Iterator<Item = &Path> {
        self.uploads.iter().map(|p| p.as_ref())
    }

    // ========== Encoding ==========

    /// Encode the payload unless a response was already produced.
    pub(crate) fn encode(&mut self) {
        if self.encoded.is_none() {
            let response = encoder::encode(self);
            self.encoded = Some(response);
        }
    }

    /// Finished response. Upload temp files go away with the context.
    pub(crate) fn finish(mut self) -> Response<Bytes> {
        self.encode();
        self.encoded.take().unwrap_or_else(encoder::internal_error)
    }
}

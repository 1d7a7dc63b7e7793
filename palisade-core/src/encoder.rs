// Response encoding: turns a finished context into an HTTP response

use crate::context::Context;
use crate::mime::{is_textual, mimetype};
use crate::payload::{Payload, STREAM_THRESHOLD, Streamed};
use crate::status::status_text;
use crate::value::{Map, Value};
use bytes::Bytes;
use http::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, LAST_MODIFIED,
    LOCATION, SET_COOKIE,
};
use http::{HeaderMap, Response, StatusCode};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const TEXT_PLAIN: &str = "text/plain";
const TEXT_HTML: &str = "text/html";
const APPLICATION_JSON: &str = "application/json";
const APPLICATION_JAVASCRIPT: &str = "application/javascript";
const OCTET_STREAM: &str = "application/octet-stream";

struct Output {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    streamed: Option<Streamed>,
}

impl Output {
    fn set(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "Dropping unencodable header value"),
        }
    }

    fn text(mut self, status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.status = status;
        self.set(CONTENT_TYPE, content_type);
        self.body = body.into();
        self
    }

    fn attachment(&mut self, name: Option<&str>) {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            let value = format!("attachment; filename={};", urlencoding::encode(name));
            self.set(CONTENT_DISPOSITION, &value);
        }
    }

    /// Leave `reader` for the connector to stream.
    fn stream(mut self, status: u16, content_type: &str, reader: Box<dyn Read + Send>) -> Self {
        self.status = status;
        self.set(CONTENT_TYPE, content_type);
        self.streamed = Some(Streamed::new(reader));
        self
    }

    fn into_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *response.headers_mut() = self.headers;
        if let Some(streamed) = self.streamed {
            response.extensions_mut().insert(streamed);
        }
        response
    }
}

/// Bare plain-text status response, written outside any site's pipeline.
pub(crate) fn status_response(status: StatusCode) -> Response<Bytes> {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Bytes::from(reason));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Plain 500 used when no response could be produced at all.
pub(crate) fn internal_error() -> Response<Bytes> {
    status_response(StatusCode::INTERNAL_SERVER_ERROR)
}

fn content_type(ctx: &Context, fallback: &str) -> String {
    let mime = mimetype(ctx.registry().mimes(), &ctx.kind, fallback);
    if is_textual(&mime) {
        format!("{mime}; charset={}", ctx.charset())
    } else {
        mime
    }
}

fn plain(ctx: &Context) -> String {
    format!("{TEXT_PLAIN}; charset={}", ctx.charset())
}

/// Encode the context's payload, headers and cookies.
pub(crate) fn encode(ctx: &mut Context) -> Response<Bytes> {
    let unset = ctx.code == 0;
    let status = if unset { 200 } else { ctx.code };

    let mut out = Output {
        status,
        headers: ctx.headers().clone(),
        body: Bytes::new(),
        streamed: None,
    };

    let config = ctx.config();
    for cookie in ctx.cookies() {
        let mut cookie = cookie.clone();
        cookie.set_path("/");
        cookie.set_http_only(config.http_only);
        let removal = cookie.max_age() == Some(cookie::time::Duration::ZERO);
        if !removal && !config.max_age.is_zero() {
            let secs = i64::try_from(config.max_age.as_secs()).unwrap_or(i64::MAX);
            cookie.set_max_age(cookie::time::Duration::seconds(secs));
        }
        match HeaderValue::from_str(&cookie.encoded().to_string()) {
            Ok(value) => {
                out.headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!(cookie = cookie.name(), "Dropping unencodable cookie"),
        }
    }

    let out = match ctx.take_payload() {
        None => {
            if unset {
                out.text(404, &plain(ctx), status_text(404))
            } else {
                out.text(status, &plain(ctx), status_text(status))
            }
        }
        Some(Payload::Status(text)) => {
            if unset {
                out.text(404, &plain(ctx), status_text(404))
            } else {
                let text = text
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| status_text(status).to_string());
                out.text(status, &content_type(ctx, TEXT_PLAIN), text)
            }
        }
        Some(Payload::Redirect(url)) => {
            let mut out = out;
            out.status = 302;
            out.set(LOCATION, &url);
            out
        }
        Some(Payload::Text(text)) => out.text(status, &content_type(ctx, TEXT_PLAIN), text),
        Some(Payload::Html(html)) => out.text(status, &content_type(ctx, TEXT_HTML), html),
        Some(Payload::Json(value)) => json(ctx, out, status, value, APPLICATION_JSON),
        Some(Payload::Jsonp { callback, value }) => match value.and_then(to_json) {
            Ok(json) => out.text(
                status,
                &content_type(ctx, APPLICATION_JAVASCRIPT),
                format!("{callback}({json});"),
            ),
            Err(err) => out.text(500, &plain(ctx), err),
        },
        Some(Payload::Echo { code, text, data }) => {
            let mut envelope = Map::new();
            envelope.insert("code".into(), Value::from(code));
            envelope.insert("time".into(), Value::from(unix_time()));
            if let Some(text) = text {
                envelope.insert("text".into(), Value::String(text));
            }
            if let Some(data) = data {
                envelope.insert("data".into(), Value::Object(data));
            }
            json(ctx, out, status, Ok(Value::Object(envelope)), APPLICATION_JSON)
        }
        Some(Payload::File { path, name }) => file(ctx, out, status, &path, name.as_deref()),
        Some(Payload::Binary { bytes, name }) => {
            let mut out = out.text(status, &content_type(ctx, OCTET_STREAM), bytes);
            out.attachment(name.as_deref());
            out
        }
        Some(Payload::Buffer { reader, size, name }) => {
            let mut out = buffer(ctx, out, status, reader, size);
            out.attachment(name.as_deref());
            out
        }
    };

    out.into_response()
}

/// Small buffers are copied here and the reader dropped at once; anything
/// past [`STREAM_THRESHOLD`] is handed on as a [`Streamed`] body.
fn buffer(
    ctx: &Context,
    out: Output,
    status: u16,
    mut reader: Box<dyn Read + Send>,
    size: Option<u64>,
) -> Output {
    let content_type = content_type(ctx, OCTET_STREAM);

    if let Some(size) = size.filter(|s| *s > STREAM_THRESHOLD) {
        let mut out = out.stream(status, &content_type, reader);
        out.set(CONTENT_LENGTH, &size.to_string());
        return out;
    }

    let mut head = Vec::new();
    let copied = reader.by_ref().take(STREAM_THRESHOLD + 1).read_to_end(&mut head);
    let length = head.len() as u64;

    if copied.is_ok() && length > STREAM_THRESHOLD {
        let rest = std::io::Cursor::new(head).chain(reader);
        return out.stream(status, &content_type, Box::new(rest));
    }
    drop(reader);

    let complete = match copied {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "Buffer payload copy failed");
            false
        }
    };

    let mut out = out.text(status, &content_type, head);
    if let Some(size) = size.filter(|s| *s > 0 && complete && *s == length) {
        out.set(CONTENT_LENGTH, &size.to_string());
    }
    out
}

fn to_json(value: Value) -> Result<String, String> {
    serde_json::to_string(&value).map_err(|e| e.to_string())
}

fn json(
    ctx: &Context,
    out: Output,
    status: u16,
    value: Result<Value, String>,
    fallback: &str,
) -> Output {
    match value.and_then(to_json) {
        Ok(json) => out.text(status, &content_type(ctx, fallback), json),
        Err(err) => {
            debug!(error = %err, "JSON payload failed to encode");
            out.text(500, &plain(ctx), err)
        }
    }
}

fn file(ctx: &Context, out: Output, status: u16, path: &Path, name: Option<&str>) -> Output {
    let opened = File::open(path).and_then(|file| {
        let metadata = file.metadata()?;
        Ok((file, metadata))
    });
    let (mut handle, metadata) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "File payload unreadable");
            return out.text(404, &plain(ctx), status_text(404));
        }
    };

    let content_type = if ctx.kind.is_empty() || ctx.kind == "file" {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let mime = mime.essence_str();
        if is_textual(mime) {
            format!("{mime}; charset={}", ctx.charset())
        } else {
            mime.to_string()
        }
    } else {
        content_type(ctx, OCTET_STREAM)
    };

    let length = metadata.len();
    let mut out = if length > STREAM_THRESHOLD {
        let mut out = out.stream(status, &content_type, Box::new(handle));
        out.set(CONTENT_LENGTH, &length.to_string());
        out
    } else {
        let mut bytes = Vec::new();
        if let Err(err) = handle.read_to_end(&mut bytes) {
            debug!(path = %path.display(), error = %err, "File payload unreadable");
            return out.text(404, &plain(ctx), status_text(404));
        }
        out.text(status, &content_type, bytes)
    };
    if let Ok(modified) = metadata.modified() {
        out.set(LAST_MODIFIED, &httpdate::fmt_http_date(modified));
    }
    out.attachment(name);
    out
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

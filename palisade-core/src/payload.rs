// Response payload variants

use crate::value::{Map, Value};
use bytes::Bytes;
use http::Response;
use parking_lot::Mutex;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// File and buffer bodies larger than this many bytes are streamed by the
/// connector instead of being copied into the response.
pub const STREAM_THRESHOLD: u64 = 1 << 20;

/// The single response body a context carries into the encoder.
///
/// JSON values are converted when the payload is set; a conversion failure
/// is kept as `Err` and turns into a 500 at encode time.
pub enum Payload {
    Redirect(String),
    Text(String),
    Html(String),
    Json(Result<Value, String>),
    Jsonp {
        callback: String,
        value: Result<Value, String>,
    },
    File {
        path: PathBuf,
        name: Option<String>,
    },
    Binary {
        bytes: Bytes,
        name: Option<String>,
    },
    /// Streamed body; the reader is dropped once copied.
    Buffer {
        reader: Box<dyn Read + Send>,
        size: Option<u64>,
        name: Option<String>,
    },
    /// Bare status line; `None` writes the reason phrase.
    Status(Option<String>),
    /// `{"code", "time", "text"?, "data"?}` envelope.
    Echo {
        code: i32,
        text: Option<String>,
        data: Option<Map>,
    },
}

impl Payload {
    /// Short type tag the encoder falls back to when no type was set.
    pub fn default_kind(&self) -> &'static str {
        match self {
            Payload::Text(_) | Payload::Status(_) => "text",
            Payload::Html(_) => "html",
            Payload::Json(_) | Payload::Echo { .. } => "json",
            Payload::Jsonp { .. } => "script",
            Payload::Redirect(_) => "",
            Payload::File { .. } | Payload::Binary { .. } | Payload::Buffer { .. } => "file",
        }
    }

    /// Attachment name, for the variants that can carry one.
    pub(crate) fn name_mut(&mut self) -> Option<&mut Option<String>> {
        match self {
            Payload::File { name, .. }
            | Payload::Binary { name, .. }
            | Payload::Buffer { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
            Payload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Payload::Html(html) => f.debug_tuple("Html").field(&html.len()).finish(),
            Payload::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Payload::Jsonp { callback, value } => f
                .debug_struct("Jsonp")
                .field("callback", callback)
                .field("value", value)
                .finish(),
            Payload::File { path, name } => f
                .debug_struct("File")
                .field("path", path)
                .field("name", name)
                .finish(),
            Payload::Binary { bytes, name } => f
                .debug_struct("Binary")
                .field("len", &bytes.len())
                .field("name", name)
                .finish(),
            Payload::Buffer { size, name, .. } => f
                .debug_struct("Buffer")
                .field("size", size)
                .field("name", name)
                .finish(),
            Payload::Status(text) => f.debug_tuple("Status").field(text).finish(),
            Payload::Echo { code, text, data } => f
                .debug_struct("Echo")
                .field("code", code)
                .field("text", text)
                .field("data", data)
                .finish(),
        }
    }
}

/// Response extension carrying a body the connector still has to stream.
///
/// The encoded response body is empty when this is present. The reader is
/// dropped by whoever takes it, once the copy ends.
#[derive(Clone)]
pub struct Streamed {
    reader: Arc<Mutex<Option<Box<dyn Read + Send>>>>,
}

impl Streamed {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(reader))),
        }
    }

    /// Take the reader; later calls get `None`.
    pub fn take(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().take()
    }
}

impl fmt::Debug for Streamed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streamed")
            .field("pending", &self.reader.lock().is_some())
            .finish()
    }
}

/// Read a streamed body into the response so it can be used whole.
///
/// Responses without a [`Streamed`] extension are returned unchanged.
pub fn buffer_streamed(mut response: Response<Bytes>) -> std::io::Result<Response<Bytes>> {
    let Some(mut reader) = response
        .extensions_mut()
        .remove::<Streamed>()
        .and_then(|streamed| streamed.take())
    else {
        return Ok(response);
    };

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    *response.body_mut() = Bytes::from(body);
    Ok(response)
}

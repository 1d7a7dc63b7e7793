//! Default connector: hyper HTTP/1.1 over tokio.
//!
//! Route records are bound into a [`RouteMatcher`]. Every accepted request is
//! collected into memory up to the configured body limit, matched by host,
//! method and path, and handed to the delegate on a blocking worker, since
//! the pipeline itself is synchronous. Large file and buffer payloads come
//! back as [`Streamed`] bodies and are copied out chunk by chunk.

use crate::config::{Config, DEFAULT_BODY_LIMIT};
use crate::driver::{Connection, Delegate, Driver, Instance, RemoteAddr};
use crate::encoder;
use crate::logging::request_span;
use crate::matcher::RouteMatcher;
use crate::payload::Streamed;
use crate::table::RouteRecord;
use crate::tls::TlsConfig;
use crate::value::Map;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::HOST;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::RwLock;
use std::convert::Infallible;
use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(15);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_CHUNK: usize = 64 * 1024;

type ResponseBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Driver registered as `default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDriver;

impl Driver for DefaultDriver {
    fn connect(&self, instance: &Instance) -> Result<Box<dyn Connection>> {
        Ok(Box::new(DefaultConnection::new(instance.clone())))
    }
}

pub struct DefaultConnection {
    instance: Instance,
    matcher: Arc<RwLock<RouteMatcher>>,
    opened: bool,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl DefaultConnection {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            matcher: Arc::new(RwLock::new(RouteMatcher::new())),
            opened: false,
            local_addr: None,
            shutdown: None,
            task: None,
        }
    }

    fn bind_addr(config: &Config) -> String {
        let host = if config.host.is_empty() {
            crate::config::DEFAULT_HOST
        } else {
            config.host.as_str()
        };
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", config.port)
        } else {
            format!("{host}:{}", config.port)
        }
    }

    async fn listen(&mut self, tls: Option<TlsConfig>) -> Result<()> {
        if !self.opened {
            return Err(Error::Internal("connection is not open".to_string()));
        }
        if self.task.is_some() {
            return Err(Error::Internal("connection already started".to_string()));
        }

        let addr = Self::bind_addr(&self.instance.config);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Bind(format!("{addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            tls = tls.is_some(),
            "Listening"
        );

        let (shutdown, signal) = watch::channel(false);
        let limit = match self.instance.config.body_limit {
            0 => DEFAULT_BODY_LIMIT,
            limit => limit,
        };
        let task = tokio::spawn(accept_loop(
            listener,
            tls,
            Dispatch {
                matcher: self.matcher.clone(),
                delegate: self.instance.delegate.clone(),
                limit,
            },
            signal,
        ));

        self.local_addr = Some(local_addr);
        self.shutdown = Some(shutdown);
        self.task = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Connection for DefaultConnection {
    async fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Listener did not stop in time");
            }
        }
        self.opened = false;
        self.local_addr = None;
        Ok(())
    }

    fn register(&mut self, name: &str, record: &RouteRecord, hosts: &[String]) -> Result<()> {
        debug!(name, method = ?record.method, uri = %record.uri, ?hosts, "Binding route");
        self.matcher
            .write()
            .insert(name, record.method.clone(), &record.uri, hosts)
    }

    async fn start(&mut self) -> Result<()> {
        self.listen(None).await
    }

    async fn start_tls(&mut self, cert_file: &str, key_file: &str) -> Result<()> {
        let tls = TlsConfig::from_pem_files(cert_file, key_file)?;
        self.listen(Some(tls)).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// What every connection needs to answer a request.
#[derive(Clone)]
struct Dispatch {
    matcher: Arc<RwLock<RouteMatcher>>,
    delegate: Arc<dyn Delegate>,
    limit: u64,
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsConfig>,
    dispatch: Dispatch,
    mut signal: watch::Receiver<bool>,
) {
    let acceptor = tls.map(|tls| tls.acceptor());

    loop {
        let (stream, remote) = tokio::select! {
            _ = signal.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "Accept failed");
                    continue;
                }
            },
        };

        let dispatch = dispatch.clone();
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, remote, dispatch).await,
                    Err(err) => debug!(%remote, error = %err, "TLS handshake failed"),
                },
                None => serve_connection(stream, remote, dispatch).await,
            }
        });
    }

    debug!("Listener stopped");
}

async fn serve_connection<I>(io: I, remote: SocketAddr, dispatch: Dispatch)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let dispatch = dispatch.clone();
        async move { handle_request(req, remote, dispatch).await }
    });

    let result = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .serve_connection(TokioIo::new(io), service)
        .await;

    if let Err(err) = result {
        debug!(%remote, error = %err, "Connection closed with error");
    }
}

async fn handle_request(
    req: Request<Incoming>,
    remote: SocketAddr,
    dispatch: Dispatch,
) -> std::result::Result<Response<ResponseBody>, Infallible> {
    let (mut parts, body) = req.into_parts();
    let body = match collect_body(body, dispatch.limit).await {
        Ok(body) => body,
        Err(rejected) => return Ok(into_body(rejected)),
    };
    parts.extensions.insert(RemoteAddr(remote));

    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
        .to_string();

    let (name, params) = dispatch
        .matcher
        .read()
        .at(&host, &parts.method, parts.uri.path())
        .map(|m| (m.name, m.params))
        .unwrap_or_else(|| (String::new(), Map::new()));

    let span = request_span(parts.method.as_str(), &host, parts.uri.path());
    let request = Request::from_parts(parts, body);
    let delegate = dispatch.delegate;

    let served = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        delegate.serve(&name, params, request)
    })
    .await;

    let response = served.unwrap_or_else(|err| {
        error!(error = %err, "Request worker failed");
        encoder::internal_error()
    });
    Ok(into_body(response))
}

/// Collect a request body of at most `limit` bytes. An oversized body is
/// answered with 413, an unreadable one with 400.
async fn collect_body<B>(body: B, limit: u64) -> std::result::Result<Bytes, Response<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(limit, "Request body over the limit");
            Err(encoder::status_response(StatusCode::PAYLOAD_TOO_LARGE))
        }
        Err(err) => {
            debug!(error = %err, "Request body unreadable");
            Err(encoder::status_response(StatusCode::BAD_REQUEST))
        }
    }
}

fn into_body(response: Response<Bytes>) -> Response<ResponseBody> {
    let streamed = response.extensions().get::<Streamed>().and_then(Streamed::take);
    response.map(|bytes| match streamed {
        Some(reader) => stream_reader(reader),
        None => Full::new(bytes)
            .map_err(|never: Infallible| match never {})
            .boxed_unsync(),
    })
}

/// Copy a blocking reader into the body on a blocking worker. The reader is
/// dropped when the copy ends or the client goes away.
fn stream_reader(mut reader: Box<dyn Read + Send>) -> ResponseBody {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Frame<Bytes>>>(4);

    tokio::task::spawn_blocking(move || {
        let mut chunk = vec![0u8; STREAM_CHUNK];
        loop {
            let frame = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => Ok(Frame::data(Bytes::copy_from_slice(&chunk[..n]))),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "Streamed body copy failed");
                    Err(err)
                }
            };
            let failed = frame.is_err();
            if tx.blocking_send(frame).is_err() || failed {
                break;
            }
        }
    });

    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    StreamBody::new(frames).boxed_unsync()
}

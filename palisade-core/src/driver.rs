//! Dispatch boundary between the registry and a network connector.
//!
//! A [`Driver`] produces one [`Connection`] per application. The application
//! hands every route record to [`Connection::register`] together with the
//! hosts of its site; on a match the connection calls
//! [`Delegate::serve`] with the record's `site.record` name and the path
//! parameters it captured. Requests that match nothing are served with an
//! empty name so the pipeline can fall back to static files and not-found.

use crate::Result;
use crate::config::Config;
use crate::table::RouteRecord;
use crate::value::Map;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Peer address, stored as a request extension by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Serves matched requests. Implemented by the sealed registry.
pub trait Delegate: Send + Sync {
    fn serve(&self, name: &str, params: Map, request: Request<Bytes>) -> Response<Bytes>;
}

/// What a driver needs to build a connection.
#[derive(Clone)]
pub struct Instance {
    /// Process-wide config: bind host, port, TLS files.
    pub config: Config,
    pub setting: Map,
    pub delegate: Arc<dyn Delegate>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("setting", &self.setting)
            .finish()
    }
}

/// Connector factory registered under a driver name.
pub trait Driver: Send + Sync {
    fn connect(&self, instance: &Instance) -> Result<Box<dyn Connection>>;
}

/// One listener and its route bindings.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Prepare the listener state. Called once before any registration.
    async fn open(&mut self) -> Result<()>;

    /// Stop accepting and wait for the listener task to finish.
    async fn close(&mut self) -> Result<()>;

    /// Bind `record` under `hosts`, or under any host when `hosts` is empty.
    fn register(&mut self, name: &str, record: &RouteRecord, hosts: &[String]) -> Result<()>;

    /// Bind and serve plain HTTP in the background.
    async fn start(&mut self) -> Result<()>;

    /// Bind and serve HTTPS in the background.
    async fn start_tls(&mut self, cert_file: &str, key_file: &str) -> Result<()>;

    /// Bound address once started.
    fn local_addr(&self) -> Option<SocketAddr>;
}

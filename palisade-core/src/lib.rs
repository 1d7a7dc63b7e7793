// Core library of the Palisade multi-tenant routing engine
// Site registry, route tables, the request pipeline and response encoding

pub mod application;
pub mod args;
pub mod config;
pub mod context;
pub mod cors;
pub mod driver;
mod encoder;
pub mod error;
pub mod host;
pub mod locale;
pub mod logging;
pub mod matcher;
pub mod mime;
mod parsing;
pub mod payload;
pub mod pipeline;
pub mod registry;
pub mod res;
pub mod route;
pub mod security;
pub mod server;
pub mod static_files;
pub mod status;
pub mod table;
pub mod tls;
pub mod url;
pub mod value;

// Re-export commonly used types
pub use application::Application;
pub use args::{ArgumentMapper, BasicMapper, Var, VarKind, Vars};
pub use config::{Config, Cross, DEFAULT_SITE};
pub use context::Context;
pub use driver::{Connection, Delegate, Driver, Instance, RemoteAddr};
pub use error::{Error, Result};
pub use host::{HostTable, normalize_host};
pub use locale::{KeyLocalizer, Languages, Localizer};
pub use matcher::{Matched, RouteMatcher};
pub use mime::{DefaultMimeTypes, MimeTypes};
pub use payload::{Payload, STREAM_THRESHOLD, Streamed, buffer_streamed};
pub use pipeline::Outcome;
pub use registry::{ALL_SITES, Binding, Registry, RegistryBuilder, Site};
pub use res::Res;
pub use route::{Filter, Handler, Route, RouteOverride, Stage, stage};
pub use security::{Session, TokenVerifier};
pub use server::{DefaultConnection, DefaultDriver};
pub use status::*;
pub use table::{OverridePolicy, RouteConfig, RouteRecord, RouteTable};
pub use url::Url;
pub use value::{Map, Value};

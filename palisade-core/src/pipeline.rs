//! Built-in pipeline stages.
//!
//! A request walks these levels, each in its own cursor frame:
//!
//! ```text
//! open:     preprocessing, serve filters, serve
//! serve:    finding, request filters, request    (then the response level)
//! request:  crossing, parsing, authorizing, arguing, execute
//! execute:  execute filters, route actions
//! response: response filters, encode
//! ```

use crate::context::Context;
use crate::res::Res;
use crate::route::{Stage, stage};
use crate::security::bearer_token;
use crate::static_files::resolve_static_file;
use crate::status::HttpStatus;
use crate::table::RouteConfig;
use std::path::Path;
use tracing::debug;

/// The four terminal outcomes of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing matched the request.
    Found,
    Error,
    /// Arguments failed validation.
    Failed,
    Denied,
}

impl Outcome {
    pub fn http_status(self) -> HttpStatus {
        match self {
            Outcome::Found => HttpStatus::NotFound,
            Outcome::Error => HttpStatus::InternalServerError,
            Outcome::Failed => HttpStatus::BadRequest,
            Outcome::Denied => HttpStatus::Unauthorized,
        }
    }

    /// Status applied when the context has none yet.
    pub fn status(self) -> u16 {
        self.http_status().code()
    }

    pub fn default_text(self) -> &'static str {
        self.http_status().reason()
    }

    pub(crate) fn route_handler(self, route: &RouteConfig) -> Option<Stage> {
        match self {
            Outcome::Found => route.found.clone(),
            Outcome::Error => route.error.clone(),
            Outcome::Failed => route.failed.clone(),
            Outcome::Denied => route.denied.clone(),
        }
    }

    /// Catch-all that closes every terminal chain.
    pub(crate) fn default_stage(self) -> Stage {
        stage(move |ctx: &mut Context| {
            ctx.set_code(self.status()).text(self.default_text());
        })
    }
}

/// Session token, Ajax flag and language.
pub(crate) fn preprocessing(ctx: &mut Context) {
    let cookie_name = ctx.config().cookie.clone();
    let mut token = if cookie_name.is_empty() {
        None
    } else {
        ctx.cookie(&cookie_name)
    };
    if let Some(authorization) = ctx.header("authorization") {
        token = Some(bearer_token(authorization).to_string());
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        ctx.verify(&token);
    }

    if ctx.header("x-requested-with").is_some()
        || ctx.header("authorization").is_some()
        || ctx.header("ajax").is_some()
    {
        ctx.ajax = true;
    }

    let language = ctx
        .header("accept-language")
        .and_then(|header| ctx.registry().languages().negotiate(header))
        .map(str::to_string);
    if let Some(language) = language {
        ctx.set_language(language);
    }

    ctx.next();
}

/// Serve level; the response level always follows it.
pub(crate) fn serve(ctx: &mut Context) {
    let chain = ctx.site().serve_chain();
    ctx.run_chain(chain);
    response(ctx);
}

/// Matched routes continue; misses try the static roots, then not-found.
pub(crate) fn finding(ctx: &mut Context) {
    if ctx.route().is_some() {
        ctx.next();
        return;
    }

    let config = ctx.config();
    let mut file = resolve_static_file(Path::new(&config.static_root), &ctx.path, &config.defaults);
    if file.is_none() {
        let global = ctx.registry().config();
        if let Some(root) = global.shared_root() {
            file = resolve_static_file(&root, &ctx.path, &global.defaults);
        }
    }

    match file {
        Some(file) => {
            debug!(path = %ctx.path, file = %file.display(), "Serving static file");
            ctx.file(file);
        }
        None => ctx.found(),
    }
}

pub(crate) fn request(ctx: &mut Context) {
    let chain = ctx.site().request_chain();
    ctx.run_chain(chain);
}

/// Signature and authentication gates.
pub(crate) fn authorizing(ctx: &mut Context) {
    let (sign, auth) = ctx
        .route()
        .map(|route| (route.sign, route.auth))
        .unwrap_or_default();

    if sign && !ctx.signed() {
        ctx.denied(Res::unsigned());
        return;
    }
    if auth && !ctx.authed() {
        ctx.denied(Res::unauthed());
        return;
    }

    ctx.next();
}

/// Coerce `value` through the route's argument schema into `args`.
pub(crate) fn arguing(ctx: &mut Context) {
    let mapped = ctx
        .route()
        .filter(|route| !route.args.is_empty())
        .map(|route| ctx.mapper().map(&route.args, &ctx.value, route.nullable, false));

    match mapped {
        Some(Err(res)) => {
            debug!(state = res.state(), "Argument mapping failed");
            ctx.failed(res);
            return;
        }
        Some(Ok(args)) => ctx.args.extend(args),
        None => {}
    }

    ctx.next();
}

pub(crate) fn execute(ctx: &mut Context) {
    let chain = ctx.site().execute_chain(ctx.route());
    ctx.run_chain(chain);
}

fn response(ctx: &mut Context) {
    let chain = ctx.site().response_chain();
    ctx.run_chain(chain);
    ctx.encode();
}

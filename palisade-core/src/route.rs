// Route, filter and handler declarations

use crate::args::{Var, Vars};
use crate::context::Context;
use crate::value::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One pipeline step. A stage continues its chain by calling
/// [`Context::next`]; returning without it ends the chain.
pub type Stage = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// Wrap a closure as a [`Stage`].
pub fn stage<F>(f: F) -> Stage
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Route declaration.
///
/// A declaration is expanded into concrete records when the registry is
/// built: one per method override (`name.get`, `name.post`, ...), one more
/// under `name.*` when the declaration carries its own action, and one per
/// extra URI (`.1`, `.2`, ...).
///
/// ```ignore
/// let route = Route::new("/users/{id}")
///     .arg("id", Var::int().required())
///     .action(|ctx| {
///         let id = ctx.args.get("id").cloned();
///         ctx.json(&id);
///     });
/// ```
#[derive(Clone, Default)]
pub struct Route {
    pub method: String,
    pub uri: String,
    pub uris: Vec<String>,
    pub name: String,
    pub desc: String,
    pub nullable: bool,
    pub args: Vars,
    pub data: Vars,
    pub setting: Map,
    pub routing: Vec<(String, RouteOverride)>,
    pub actions: Vec<Stage>,
    pub action: Option<Stage>,
    /// Requires a signed session.
    pub sign: bool,
    /// Requires an authenticated session.
    pub auth: bool,
    pub found: Option<Stage>,
    pub error: Option<Stage>,
    pub failed: Option<Stage>,
    pub denied: Option<Stage>,
}

impl Route {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn uris<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uris = uris.into_iter().map(Into::into).collect();
        self
    }

    /// Method answered by the `name.*` record; empty or `*` means any.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn arg(mut self, key: impl Into<String>, var: Var) -> Self {
        self.args.insert(key.into(), var);
        self
    }

    pub fn data(mut self, key: impl Into<String>, var: Var) -> Self {
        self.data.insert(key.into(), var);
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.setting.insert(key.into(), value.into());
        self
    }

    /// Add a method-specific variant of this route.
    pub fn routing(mut self, method: impl Into<String>, over: RouteOverride) -> Self {
        let method = method.into().to_lowercase();
        match self.routing.iter_mut().find(|(m, _)| *m == method) {
            Some(entry) => entry.1 = over,
            None => self.routing.push((method, over)),
        }
        self
    }

    /// Set the final action, run after every `then` step.
    pub fn action<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.action = Some(stage(f));
        self
    }

    /// Append an ordered action step.
    pub fn then<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.actions.push(stage(f));
        self
    }

    pub fn sign(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    pub fn auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    pub fn on_found<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.found = Some(stage(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.error = Some(stage(f));
        self
    }

    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.failed = Some(stage(f));
        self
    }

    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.denied = Some(stage(f));
        self
    }

    /// The declaration carries its own action and gets a `name.*` record.
    pub fn has_action(&self) -> bool {
        self.action.is_some() || !self.actions.is_empty()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("uris", &self.uris)
            .field("name", &self.name)
            .field("routing", &self.routing.iter().map(|(m, _)| m).collect::<Vec<_>>())
            .field("actions", &(self.actions.len() + usize::from(self.action.is_some())))
            .field("sign", &self.sign)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Method-specific replacement fields. `None` keeps the declaration's value;
/// `args`, `data` and `setting` merge key by key instead of replacing.
#[derive(Clone, Default)]
pub struct RouteOverride {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub nullable: Option<bool>,
    pub args: Option<Vars>,
    pub data: Option<Vars>,
    pub setting: Option<Map>,
    pub actions: Option<Vec<Stage>>,
    pub action: Option<Stage>,
    pub found: Option<Stage>,
    pub error: Option<Stage>,
    pub failed: Option<Stage>,
    pub denied: Option<Stage>,
}

impl RouteOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn arg(mut self, key: impl Into<String>, var: Var) -> Self {
        self.args.get_or_insert_with(Vars::new).insert(key.into(), var);
        self
    }

    pub fn data(mut self, key: impl Into<String>, var: Var) -> Self {
        self.data.get_or_insert_with(Vars::new).insert(key.into(), var);
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.setting
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn action<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.action = Some(stage(f));
        self
    }

    pub fn then<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.actions.get_or_insert_with(Vec::new).push(stage(f));
        self
    }

    pub fn on_found<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.found = Some(stage(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.error = Some(stage(f));
        self
    }

    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.failed = Some(stage(f));
        self
    }

    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.denied = Some(stage(f));
        self
    }
}

/// Site-level interceptor with up to four hook points.
#[derive(Clone, Default)]
pub struct Filter {
    pub name: String,
    pub desc: String,
    /// Before route resolution.
    pub serve: Option<Stage>,
    /// After the route is found, before cross-origin checks.
    pub request: Option<Stage>,
    /// Right before the route's actions.
    pub execute: Option<Stage>,
    /// Before the response is encoded.
    pub response: Option<Stage>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn serve<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.serve = Some(stage(f));
        self
    }

    pub fn request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.request = Some(stage(f));
        self
    }

    pub fn execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.execute = Some(stage(f));
        self
    }

    pub fn response<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.response = Some(stage(f));
        self
    }
}

/// Site-level terminal handlers.
#[derive(Clone, Default)]
pub struct Handler {
    pub name: String,
    pub desc: String,
    pub found: Option<Stage>,
    pub error: Option<Stage>,
    pub failed: Option<Stage>,
    pub denied: Option<Stage>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn found<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.found = Some(stage(f));
        self
    }

    pub fn error<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.error = Some(stage(f));
        self
    }

    pub fn failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.failed = Some(stage(f));
        self
    }

    pub fn denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.denied = Some(stage(f));
        self
    }
}

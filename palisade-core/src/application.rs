//! Application lifecycle.
//!
//! An [`Application`] collects registrations until [`Application::setup`]
//! seals them into a [`Registry`]. Registrations arriving after that are
//! ignored. `open` connects the configured driver and binds every route
//! record, `start` begins listening, `stop` and `close` undo them.
//!
//! ```no_run
//! use palisade_core::*;
//!
//! # async fn example() -> Result<()> {
//! let app = Application::new();
//! app.configure(Config::new().with_port(3000));
//! app.register_route(
//!     "user.profile",
//!     Route::new("/users/{id}")
//!         .arg("id", Var::int().required())
//!         .action(|ctx: &mut Context| {
//!             let id = ctx.args.get("id").cloned().unwrap_or_default();
//!             ctx.json(&serde_json::json!({ "id": id }));
//!         }),
//! );
//!
//! app.run().await
//! # }
//! ```

use crate::args::ArgumentMapper;
use crate::config::{Config, Cross, DEFAULT_DRIVER};
use crate::driver::{Connection, Delegate, Driver, Instance};
use crate::locale::Localizer;
use crate::mime::MimeTypes;
use crate::registry::{Registry, RegistryBuilder};
use crate::route::{Filter, Handler, Route};
use crate::security::TokenVerifier;
use crate::server::DefaultDriver;
use crate::table::OverridePolicy;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

#[derive(Default)]
struct State {
    connection: Option<Box<dyn Connection>>,
    started: bool,
}

pub struct Application {
    builder: Mutex<Option<RegistryBuilder>>,
    registry: OnceLock<Arc<Registry>>,
    state: tokio::sync::Mutex<State>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// Application with the default connector registered.
    pub fn new() -> Self {
        let mut builder = RegistryBuilder::new();
        builder.register_driver(DEFAULT_DRIVER, Arc::new(DefaultDriver));
        Self::with_builder(builder)
    }

    pub fn with_builder(builder: RegistryBuilder) -> Self {
        Self {
            builder: Mutex::new(Some(builder)),
            registry: OnceLock::new(),
            state: tokio::sync::Mutex::new(State::default()),
        }
    }

    /// Run `f` against the builder unless the registry is already sealed.
    fn building<R>(&self, what: &str, f: impl FnOnce(&mut RegistryBuilder) -> R) -> Option<R> {
        let mut guard = self.builder.lock();
        match guard.as_mut() {
            Some(builder) => Some(f(builder)),
            None => {
                debug!(what, "Registry sealed, registration ignored");
                None
            }
        }
    }

    pub fn set_policy(&self, policy: OverridePolicy) {
        self.building("policy", |b| {
            b.set_policy(policy);
        });
    }

    pub fn configure(&self, config: Config) {
        self.building("config", |b| {
            b.configure(config);
        });
    }

    pub fn configure_site(&self, name: &str, config: Config) {
        self.building("site config", |b| {
            b.configure_site(name, config);
        });
    }

    pub fn set_cross(&self, cross: Cross) {
        self.building("cross", |b| {
            b.set_cross(cross);
        });
    }

    /// Returns whether the route was stored.
    pub fn register_route(&self, name: &str, route: Route) -> bool {
        self.building("route", |b| b.register_route(name, route))
            .unwrap_or(false)
    }

    pub fn register_filter(&self, name: &str, filter: Filter) -> bool {
        self.building("filter", |b| b.register_filter(name, filter))
            .unwrap_or(false)
    }

    pub fn register_handler(&self, name: &str, handler: Handler) -> bool {
        self.building("handler", |b| b.register_handler(name, handler))
            .unwrap_or(false)
    }

    pub fn register_driver(&self, name: &str, driver: Arc<dyn Driver>) -> bool {
        self.building("driver", |b| b.register_driver(name, driver))
            .unwrap_or(false)
    }

    pub fn register_language<I, S>(&self, lang: &str, accepts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.building("language", |b| {
            b.register_language(lang, accepts);
        });
    }

    pub fn set_mapper(&self, mapper: Arc<dyn ArgumentMapper>) {
        self.building("mapper", |b| {
            b.set_mapper(mapper);
        });
    }

    pub fn set_verifier(&self, verifier: Arc<dyn TokenVerifier>) {
        self.building("verifier", |b| {
            b.set_verifier(verifier);
        });
    }

    pub fn set_localizer(&self, localizer: Arc<dyn Localizer>) {
        self.building("localizer", |b| {
            b.set_localizer(localizer);
        });
    }

    pub fn set_mimes(&self, mimes: Arc<dyn MimeTypes>) {
        self.building("mime types", |b| {
            b.set_mimes(mimes);
        });
    }

    /// Seal the registry. Later calls return the same registry.
    pub fn setup(&self) -> Arc<Registry> {
        self.registry
            .get_or_init(|| {
                let builder = self.builder.lock().take().unwrap_or_default();
                let registry = builder.build();
                info!(sites = registry.sites().count(), "Registry sealed");
                registry
            })
            .clone()
    }

    /// The sealed registry, if `setup` has run.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.get().cloned()
    }

    /// Connect the configured driver and bind every route record.
    pub async fn open(&self) -> Result<()> {
        let registry = self.setup();
        let mut state = self.state.lock().await;
        if state.connection.is_some() {
            return Ok(());
        }

        let config = registry.config().clone();
        let driver = registry
            .driver(&config.driver)
            .cloned()
            .ok_or_else(|| Error::Driver(config.driver.clone()))?;

        let delegate: Arc<dyn Delegate> = registry.clone();
        let instance = Instance {
            setting: config.setting(),
            config,
            delegate,
        };

        let mut connection = driver.connect(&instance)?;
        connection.open().await?;

        let bindings = registry.bindings();
        for binding in &bindings {
            connection.register(&binding.name, &binding.record, &binding.hosts)?;
        }
        info!(routes = bindings.len(), driver = %instance.config.driver, "Connection opened");

        state.connection = Some(connection);
        Ok(())
    }

    /// Start listening, over TLS when both certificate and key are configured.
    pub async fn start(&self) -> Result<()> {
        self.open().await?;
        let registry = self.setup();
        let config = registry.config();

        let mut state = self.state.lock().await;
        if state.started {
            return Ok(());
        }
        let Some(connection) = state.connection.as_mut() else {
            return Err(Error::Internal("connection is not open".to_string()));
        };

        if config.has_tls() {
            connection.start_tls(&config.cert_file, &config.key_file).await?;
        } else {
            connection.start().await?;
        }
        state.started = true;
        Ok(())
    }

    /// Stop listening. The connection is dropped; `start` opens a new one.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Ok(());
        }
        state.started = false;
        if let Some(mut connection) = state.connection.take() {
            connection.close().await?;
        }
        info!("Application stopped");
        Ok(())
    }

    /// Close the connection, stopping first if needed.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.started = false;
        if let Some(mut connection) = state.connection.take() {
            connection.close().await?;
            info!("Connection closed");
        }
        Ok(())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let state = self.state.lock().await;
        state.connection.as_ref().and_then(|c| c.local_addr())
    }

    /// Start, wait for Ctrl-C, then close.
    ///
    /// Installs the default JSON subscriber first when the process has none.
    pub async fn run(&self) -> Result<()> {
        let _logging = crate::logging::init_default();
        self.start().await?;
        if let Some(addr) = self.local_addr().await {
            info!(%addr, "Serving");
        }
        tokio::signal::ctrl_c().await?;
        self.close().await
    }
}

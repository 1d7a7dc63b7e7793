// Palisade - a multi-tenant HTTP router and middleware pipeline
//
// Sites are selected by host, routes are addressed by name, requests run
// through staged filters, and URLs are built back from route names.

// Re-export core functionality
pub use palisade_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use palisade_config;

#[cfg(feature = "testing")]
pub use palisade_testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application, Config, Context, Cross, Error, Filter, Handler, Map, Outcome, Payload,
        Registry, Res, Result, Route, RouteOverride, Url, Value, Var, stage,
    };
}

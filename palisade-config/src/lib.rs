// Configuration loading for Palisade applications

pub mod env;
pub mod error;
pub mod loader;
pub mod log;
pub mod settings;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use log::LogSection;
pub use settings::{Sections, Settings};

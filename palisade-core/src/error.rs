// Error types for the Palisade routing engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid web driver: {0}")]
    Driver(String),

    #[error("Failed to bind listener: {0}")]
    Bind(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Route registration error: {0}")]
    Route(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status code used when the error has to be turned into a response.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Route(_) => 404,
            _ => 500,
        }
    }

    /// Startup errors abort initialization; nothing retries them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Driver(_) | Error::Bind(_) | Error::Tls(_) | Error::Route(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! AWG Admin Error Types

use thiserror::Error;

/// Result type alias for AWG Admin operations
pub type Result<T> = std::result::Result<T, Error>;

/// AWG Admin error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Interface errors
    #[error("Interface command failed: {0}")]
    InterfaceCommand(String),

    // Peer errors
    #[error("Peer not found: {0}")]
    NotFound(String),

    #[error("Address pool exhausted for subnet {0}.0/24")]
    PoolExhausted(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error means the requested peer does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this error was caused by the caller's input rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Validation(_) | Error::PoolExhausted(_)
        )
    }

    /// Check if this error came from the network interface layer
    pub fn is_interface_error(&self) -> bool {
        matches!(self, Error::InterfaceCommand(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(format!("SQLite error: {}", e))
    }
}

//! Error type shared by the ARCS crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures outside the import pipeline: startup, configuration and the
/// plain read/write queries behind the HTTP API
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the root folder or reading files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad or unreadable TOML configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a value storage rejected (e.g. duplicate repo code)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored data that should not exist (unregistered type, corrupt JSON)
    #[error("Internal error: {0}")]
    Internal(String),
}

//! Shared error and result types for Bursar

use thiserror::Error;

/// Service-level errors
#[derive(Error, Debug)]
pub enum BursarError {
    /// Configuration problem detected at startup or first use
    #[error("Configuration error: {0}")]
    Config(String),

    /// MongoDB connectivity or query failure
    #[error("Database error: {0}")]
    Database(String),

    /// HTTP-layer failure (body read, JSON parse, upstream call)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Token generation or validation failure
    #[error("Auth error: {0}")]
    Auth(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BursarError>;

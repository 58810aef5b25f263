//! Custom error types for nowplaying-on-typetalk.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the application.
#[derive(Debug, Error)]
pub enum NowPlayingError {
    /// Configuration loading or parsing error.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A required setting was empty after all layers were merged.
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    /// The user's home directory could not be determined.
    #[error("Could not determine the home directory")]
    HomeDirNotFound,

    /// Spotify API client error.
    #[error("Spotify error: {0}")]
    Spotify(#[from] rspotify::ClientError),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Typetalk API answered with a non-success status.
    #[error("Typetalk error: {0}")]
    Typetalk(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The OAuth callback carried a state that does not match the handshake nonce.
    #[error("State mismatch: received {0:?}")]
    StateMismatch(String),

    /// Cached Spotify token could not be used.
    #[error("Token cache: {0}")]
    TokenCache(#[from] TokenCacheError),

    /// A background task did not stop within its deadline.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a cached token is not usable.
#[derive(Debug, Error)]
pub enum TokenCacheError {
    /// The token file is absent or unreadable.
    #[error("token file not found: {0}")]
    NotFound(#[source] std::io::Error),

    /// The token file exists but does not decode.
    #[error("token file is malformed: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The token expired at the given instant.
    #[error("expired token (expiry {expiry})")]
    Expired { expiry: DateTime<Utc> },
}

/// Convenience type alias for Results using NowPlayingError.
pub type Result<T> = std::result::Result<T, NowPlayingError>;

//! Core error types for outdial-core.
//!
//! This module defines the error hierarchy using thiserror. Handshake and
//! refresh failures carry the short, user-actionable messages the UI shows
//! directly; backend-reported reasons pass through only when they are
//! already plain language.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for outdial-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Backend API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Account-link lifecycle errors
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Local cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors talking to the platform backend.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connection, TLS, body read)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered 2xx but the envelope carries an error field,
    /// either at the top level or nested under `data`. The message is the
    /// backend's own reason, passed through verbatim.
    #[error("{0}")]
    Envelope(String),

    /// A field the contract requires was absent from the response
    #[error("Missing field '{field}' in backend response")]
    MissingField { field: &'static str },

    /// Graph proxy answered 401
    #[error("Microsoft token expired. Please try reconnecting your Microsoft account.")]
    TokenExpired,

    /// Graph proxy reported a non-auth error
    #[error("Graph API call failed: {0}")]
    Graph(String),
}

/// Errors in the account-link lifecycle.
///
/// Fatal-to-attempt variants only; transient poll failures are logged and
/// retried inside the coordinator, and stale-attempt results are discarded
/// silently rather than surfaced.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Could not obtain an authorization URL. No window was opened.
    #[error("Failed to get Microsoft login URL")]
    InitiationFailed(#[source] ApiError),

    /// An authorization code was received but the backend rejected or
    /// failed the exchange. Cached state is left disconnected.
    #[error("Failed to connect Microsoft account: {0}")]
    ExchangeFailed(String),

    /// Neither the message path nor polling concluded within the bound.
    #[error("Authentication timed out. Please try again.")]
    Timeout,

    /// The auth window could not be opened.
    #[error("Failed to open authorization window: {0}")]
    Surface(String),

    /// The account was never linked, or the link was removed.
    #[error("Microsoft account is not connected")]
    NotConnected,
}

/// Errors from the local state cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Reading a key failed
    #[error("Cache read failed for '{key}': {message}")]
    ReadFailed { key: String, message: String },

    /// Writing a key failed
    #[error("Cache write failed for '{key}': {message}")]
    WriteFailed { key: String, message: String },

    /// Removing a key failed
    #[error("Cache remove failed for '{key}': {message}")]
    RemoveFailed { key: String, message: String },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),
}

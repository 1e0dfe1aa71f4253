//! # Outdial Core Library
//!
//! Core business logic for Outdial's Microsoft account linking. The CLI
//! binary and any GUI shell are thin layers over this library.
//!
//! ## Architecture
//!
//! - **Link lifecycle**: tracker / scheduler / handshake split over one
//!   shared advisory cache, with the backend's token-status report as the
//!   single source of truth
//! - **Backend client**: reqwest client for the platform's Microsoft-auth
//!   endpoints, plus the calendar/Graph operations the link serves
//! - **Cache**: injectable key-value store (OS keyring in production,
//!   in-memory in tests) holding the connection flags
//! - **Config**: TOML-based settings for the backend location and link
//!   timing constants
//!
//! ## Key Components
//!
//! - [`ConnectionTracker`]: validity checks and cache correction
//! - [`RefreshScheduler`]: cooldown-guarded periodic checks
//! - [`HandshakeCoordinator`]: the OAuth linking state machine
//! - [`HttpBackend`]: the platform backend client

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod link;

pub use api::{ConnectInfo, HttpBackend, LinkBackend, TokenStatus};
pub use cache::{KeyringCache, LinkCache, MemoryCache, StateCache};
pub use config::{ApiConfig, Config, LinkConfig};
pub use error::{ApiError, CacheError, ConfigError, CoreError, LinkError};
pub use link::{
    AuthMessage, AuthSurface, ConnectionState, ConnectionTracker, HandshakeCoordinator,
    HandshakeOutcome, HandshakeState, LoopbackSurface, PopupHandle, RefreshHandle,
    RefreshScheduler, AUTH_CALLBACK_KIND,
};

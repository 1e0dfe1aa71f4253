//! Local connection-state cache.
//!
//! A small key-value store holding the believed state of the Microsoft
//! account link: a connected flag, absolute token-expiry stamps, and an
//! expired marker. The cache is a UX optimization only -- the backend's
//! token-status report always wins on conflict, so writes here are advisory
//! and write failures are logged rather than propagated.
//!
//! The store itself sits behind [`StateCache`] so tests can substitute an
//! in-memory implementation; production uses the OS keyring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::CacheError;

/// Cache key names. These match the original deployment so a stored cache
/// survives reimplementation.
pub mod keys {
    /// `"true"` once a link is believed live.
    pub const CONNECTED: &str = "microsoft_connected";
    /// Absolute access-token expiry, epoch milliseconds.
    pub const TOKEN_EXPIRY: &str = "microsoft_token_expiry";
    /// Absolute refresh-token expiry, epoch milliseconds.
    pub const REFRESH_TOKEN_EXPIRY: &str = "microsoft_refresh_token_expiry";
    /// `"true"` when the backend reported the token exists but expired.
    pub const TOKEN_EXPIRED: &str = "microsoft_token_expired";
    /// Epoch milliseconds of the last successful link/refresh.
    pub const LAST_REFRESH: &str = "microsoft_last_refresh";
}

/// Key-value store abstraction for connection state.
pub trait StateCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory cache for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let guard = self.inner.lock().map_err(|e| CacheError::ReadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().map_err(|e| CacheError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().map_err(|e| CacheError::RemoveFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        guard.remove(key);
        Ok(())
    }
}

/// OS-keyring-backed cache. Survives restarts; cleared explicitly on
/// disconnect or detected expiry.
pub struct KeyringCache {
    service: String,
}

impl KeyringCache {
    pub fn new() -> Self {
        Self {
            service: "outdial".to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(&self.service, key)
    }
}

impl Default for KeyringCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache for KeyringCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entry = self.entry(key).map_err(|e| CacheError::ReadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        match entry.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CacheError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let entry = self.entry(key).map_err(|e| CacheError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        entry.set_password(value).map_err(|e| CacheError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let entry = self.entry(key).map_err(|e| CacheError::RemoveFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CacheError::RemoveFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Typed accessor over the connection keys.
///
/// Writes swallow storage failures with a warning: the cache never gates a
/// security-relevant decision, the backend report does.
#[derive(Clone)]
pub struct LinkCache {
    store: Arc<dyn StateCache>,
}

impl LinkCache {
    pub fn new(store: Arc<dyn StateCache>) -> Self {
        Self { store }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!("cache read failed: {e}");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("cache write failed: {e}");
        }
    }

    fn erase(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("cache remove failed: {e}");
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.read(keys::CONNECTED).as_deref() == Some("true")
    }

    pub fn is_expired_flagged(&self) -> bool {
        self.read(keys::TOKEN_EXPIRED).as_deref() == Some("true")
    }

    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.read_stamp(keys::TOKEN_EXPIRY)
    }

    pub fn refresh_token_expiry(&self) -> Option<DateTime<Utc>> {
        self.read_stamp(keys::REFRESH_TOKEN_EXPIRY)
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.read_stamp(keys::LAST_REFRESH)
    }

    fn read_stamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let ms: i64 = self.read(key)?.parse().ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Record a live link, converting relative expiries (seconds) into
    /// absolute epoch-ms stamps. Clears any stale expired marker.
    pub fn mark_connected(&self, expires_in: Option<i64>, refresh_token_expires_in: Option<i64>) {
        self.write(keys::CONNECTED, "true");
        self.erase(keys::TOKEN_EXPIRED);
        let now_ms = Utc::now().timestamp_millis();
        if let Some(secs) = expires_in {
            self.write(keys::TOKEN_EXPIRY, &(now_ms + secs * 1000).to_string());
        }
        if let Some(secs) = refresh_token_expires_in {
            self.write(
                keys::REFRESH_TOKEN_EXPIRY,
                &(now_ms + secs * 1000).to_string(),
            );
        }
    }

    /// Record that the backend reported an existing-but-expired token.
    pub fn mark_expired(&self) {
        self.write(keys::TOKEN_EXPIRED, "true");
        self.erase(keys::CONNECTED);
    }

    /// Drop the connected flag and its expiry stamp. Used when a status
    /// check reports no valid token.
    pub fn clear_connected(&self) {
        self.erase(keys::CONNECTED);
        self.erase(keys::TOKEN_EXPIRY);
    }

    /// Stamp the time of the last successful link/refresh.
    pub fn stamp_refresh(&self, at: DateTime<Utc>) {
        self.write(keys::LAST_REFRESH, &at.timestamp_millis().to_string());
    }

    /// Clear every connection key. Used on disconnect and at the start of a
    /// new handshake attempt so a half-finished previous attempt cannot
    /// masquerade as success.
    pub fn clear(&self) {
        for key in [
            keys::CONNECTED,
            keys::TOKEN_EXPIRY,
            keys::REFRESH_TOKEN_EXPIRY,
            keys::TOKEN_EXPIRED,
            keys::LAST_REFRESH,
        ] {
            self.erase(key);
        }
    }
}

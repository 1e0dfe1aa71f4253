//! Connection state tracking.
//!
//! Answers "is the Microsoft account connected, and is its token usable
//! right now?" and keeps the local cache consistent with the backend's
//! token-status report. The cache is advisory; on conflict the backend
//! wins and the cache is corrected. Errors fail closed: a check that
//! cannot complete never leaves a stale `Connected`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::LinkBackend;
use crate::cache::LinkCache;
use crate::error::ApiError;

/// Believed state of the account link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected {
        last_refreshed_at: Option<DateTime<Utc>>,
    },
    Expired,
}

/// Tracks link state against the backend and corrects the local cache.
///
/// This component never initiates a handshake; it only reports and
/// records.
#[derive(Clone)]
pub struct ConnectionTracker {
    backend: Arc<dyn LinkBackend>,
    cache: LinkCache,
    user_id: String,
}

impl ConnectionTracker {
    pub fn new(backend: Arc<dyn LinkBackend>, cache: LinkCache, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            cache,
            user_id: user_id.into(),
        }
    }

    pub fn cache(&self) -> &LinkCache {
        &self.cache
    }

    /// Check token validity with the backend and correct the cache.
    ///
    /// Any response other than a clean `valid` -- including transport
    /// failure -- returns false and drops the cached connected flag.
    pub async fn is_token_valid(&self) -> bool {
        match self.backend.token_status(&self.user_id).await {
            Ok(status) if status.valid => {
                debug!(
                    expires_in = ?status.expires_in,
                    "token valid"
                );
                self.cache
                    .mark_connected(status.expires_in, status.refresh_token_expires_in);
                true
            }
            Ok(status) if status.exists == Some(true) && status.is_expired == Some(true) => {
                debug!("token exists but has expired");
                self.cache.mark_expired();
                false
            }
            Ok(_) => {
                debug!("no valid token for user");
                self.cache.clear_connected();
                false
            }
            Err(e) => {
                warn!("token status check failed: {e}");
                self.cache.clear_connected();
                false
            }
        }
    }

    /// Pure cache read for immediate rendering before an async check
    /// resolves. No network call. The connected flag takes precedence
    /// over a leftover expired marker.
    pub fn current_status(&self) -> ConnectionState {
        if self.cache.is_connected() {
            ConnectionState::Connected {
                last_refreshed_at: self.cache.last_refreshed_at(),
            }
        } else if self.cache.is_expired_flagged() {
            ConnectionState::Expired
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Remove the link. The cache is cleared whatever the backend says.
    pub async fn disconnect(&self) -> Result<bool, ApiError> {
        let result = self.backend.disconnect(&self.user_id).await;
        self.cache.clear();
        result
    }
}

//! OAuth handshake coordination.
//!
//! Drives one complete "link the Microsoft account" interaction: fetch an
//! authorization URL, open the auth window, then race two completion
//! signals -- the one-shot origin-checked callback message and a bounded
//! backend polling loop. Either path may win; both conclude idempotently.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> AwaitingCallback -> Completed | TimedOut | Failed
//! ```
//!
//! At most one attempt is live per coordinator. Starting a new attempt
//! bumps a generation counter; callbacks still in flight from a superseded
//! attempt compare generations and discard themselves without touching
//! state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::api::{ConnectInfo, LinkBackend};
use crate::cache::LinkCache;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::link::status::{ConnectionState, ConnectionTracker};
use crate::link::surface::{AuthMessage, AuthSurface, AUTH_CALLBACK_KIND};

/// Where the current (or last) handshake attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingCallback,
    Completed,
    TimedOut,
    Failed,
}

/// How a handshake attempt concluded without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The link is live and the cache is stamped.
    Completed { last_refreshed_at: DateTime<Utc> },
    /// A newer attempt took over; this one wrote nothing.
    Superseded,
}

/// Coordinates the auth window, callback message, and polling loop for
/// one linking attempt at a time.
pub struct HandshakeCoordinator {
    backend: Arc<dyn LinkBackend>,
    cache: LinkCache,
    surface: Arc<dyn AuthSurface>,
    user_id: String,
    timing: LinkConfig,
    generation: AtomicU64,
    state: Mutex<HandshakeState>,
}

impl HandshakeCoordinator {
    pub fn new(
        backend: Arc<dyn LinkBackend>,
        cache: LinkCache,
        surface: Arc<dyn AuthSurface>,
        user_id: impl Into<String>,
        timing: LinkConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            surface,
            user_id: user_id.into(),
            timing,
            generation: AtomicU64::new(0),
            state: Mutex::new(HandshakeState::Idle),
        }
    }

    /// Current attempt state, for rendering.
    pub fn state(&self) -> HandshakeState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(HandshakeState::Idle)
    }

    /// Abandon the current attempt. Its callbacks become no-ops. The auth
    /// window is left alone -- the user may still be interacting with it.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            *state = HandshakeState::Idle;
        }
    }

    /// Run one complete linking attempt. Supersedes any attempt already in
    /// flight on this coordinator.
    pub async fn connect(&self) -> Result<HandshakeOutcome, LinkError> {
        let my_gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.store_state(my_gen, HandshakeState::AwaitingCallback);

        // A half-finished previous attempt must not masquerade as success.
        self.cache.clear();

        let auth_url = match self.backend.login_url(&self.user_id).await {
            Ok(url) => url,
            Err(e) => {
                self.store_state(my_gen, HandshakeState::Failed);
                return Err(LinkError::InitiationFailed(e));
            }
        };

        let mut messages = Some(self.surface.subscribe());
        let popup = match self.surface.open(&auth_url) {
            Ok(popup) => popup,
            Err(e) => {
                self.store_state(my_gen, HandshakeState::Failed);
                return Err(e);
            }
        };

        // Polling starts a full interval late so the message path gets a
        // head start over the provider redirect.
        let poll_interval = self.timing.poll_interval();
        let mut polls = interval_at(Instant::now() + poll_interval, poll_interval);
        let mut attempts_left = self.timing.max_poll_attempts;

        loop {
            if self.superseded(my_gen) {
                return Ok(HandshakeOutcome::Superseded);
            }

            tokio::select! {
                msg = next_message(&mut messages) => {
                    if !self.accepts(&msg) {
                        continue;
                    }
                    let Some(code) = msg.code else { continue };
                    if self.superseded(my_gen) {
                        return Ok(HandshakeOutcome::Superseded);
                    }
                    // One-shot: stop listening before anything else.
                    messages = None;
                    self.surface.close(popup);
                    return self.exchange(my_gen, &code).await;
                }
                _ = polls.tick() => {
                    attempts_left = attempts_left.saturating_sub(1);
                    debug!(attempts_left, "polling for authentication status");
                    match self.backend.token_status(&self.user_id).await {
                        Ok(status) if status.valid && status.exists.unwrap_or(false) => {
                            debug!("authentication confirmed via polling");
                            return self.conclude_connected(my_gen, ConnectInfo {
                                expires_in: status.expires_in,
                                refresh_token_expires_in: status.refresh_token_expires_in,
                            });
                        }
                        Ok(_) => debug!("not authenticated yet"),
                        // The handshake is still plausibly pending in the
                        // auth window; a failed poll never aborts the loop.
                        Err(e) => warn!("status poll failed, will retry: {e}"),
                    }
                    if attempts_left == 0 {
                        if self.superseded(my_gen) {
                            return Ok(HandshakeOutcome::Superseded);
                        }
                        self.store_state(my_gen, HandshakeState::TimedOut);
                        return Err(LinkError::Timeout);
                    }
                }
            }
        }
    }

    /// When the cache says Expired, try a plain validity check first (the
    /// backend refreshes transparently); fall through to a full handshake
    /// only when that fails.
    pub async fn connect_or_refresh(
        &self,
        tracker: &ConnectionTracker,
    ) -> Result<HandshakeOutcome, LinkError> {
        if tracker.current_status() == ConnectionState::Expired {
            debug!("token expired, attempting refresh before a new handshake");
            if tracker.is_token_valid().await {
                let now = Utc::now();
                self.cache.stamp_refresh(now);
                return Ok(HandshakeOutcome::Completed {
                    last_refreshed_at: now,
                });
            }
        }
        self.connect().await
    }

    /// Origin check is a security boundary: a well-formed callback from
    /// anywhere but our own origin is discarded, not an error.
    fn accepts(&self, msg: &AuthMessage) -> bool {
        if msg.origin != self.surface.origin() {
            debug!(origin = %msg.origin, "discarding auth message from foreign origin");
            return false;
        }
        if msg.kind != AUTH_CALLBACK_KIND {
            debug!(kind = %msg.kind, "discarding unrecognized auth message");
            return false;
        }
        true
    }

    async fn exchange(&self, my_gen: u64, code: &str) -> Result<HandshakeOutcome, LinkError> {
        if self.superseded(my_gen) {
            return Ok(HandshakeOutcome::Superseded);
        }
        match self.backend.connect(&self.user_id, code).await {
            Ok(info) => self.conclude_connected(my_gen, info),
            Err(e) => {
                self.store_state(my_gen, HandshakeState::Failed);
                Err(LinkError::ExchangeFailed(e.to_string()))
            }
        }
    }

    fn conclude_connected(
        &self,
        my_gen: u64,
        info: ConnectInfo,
    ) -> Result<HandshakeOutcome, LinkError> {
        if self.superseded(my_gen) {
            return Ok(HandshakeOutcome::Superseded);
        }
        let now = Utc::now();
        self.cache
            .mark_connected(info.expires_in, info.refresh_token_expires_in);
        self.cache.stamp_refresh(now);
        self.store_state(my_gen, HandshakeState::Completed);
        Ok(HandshakeOutcome::Completed {
            last_refreshed_at: now,
        })
    }

    fn superseded(&self, my_gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != my_gen
    }

    fn store_state(&self, my_gen: u64, state: HandshakeState) {
        if self.superseded(my_gen) {
            return;
        }
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

/// Wait on the callback channel, parking forever once it is closed or
/// dropped so the polling branch keeps the select alive.
async fn next_message(rx: &mut Option<mpsc::UnboundedReceiver<AuthMessage>>) -> AuthMessage {
    match rx {
        Some(receiver) => match receiver.recv().await {
            Some(msg) => msg,
            None => {
                *rx = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}

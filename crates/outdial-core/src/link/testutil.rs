//! Scripted collaborators for link tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::{ConnectInfo, LinkBackend, TokenStatus};
use crate::error::{ApiError, LinkError};
use crate::link::surface::{AuthMessage, AuthSurface, PopupHandle};

/// Scripted [`LinkBackend`]. Token-status results are consumed from a
/// queue; once drained, the fallback status repeats. Login/connect/
/// disconnect results are one-shot overrides with benign defaults.
#[derive(Default)]
pub struct StubBackend {
    login_result: Mutex<Option<Result<String, ApiError>>>,
    connect_result: Mutex<Option<Result<ConnectInfo, ApiError>>>,
    disconnect_result: Mutex<Option<Result<bool, ApiError>>>,
    statuses: Mutex<VecDeque<Result<TokenStatus, ApiError>>>,
    fallback_status: Mutex<TokenStatus>,
    login_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: Result<TokenStatus, ApiError>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_fallback_status(&self, status: TokenStatus) {
        *self.fallback_status.lock().unwrap() = status;
    }

    pub fn set_login(&self, result: Result<String, ApiError>) {
        *self.login_result.lock().unwrap() = Some(result);
    }

    pub fn set_connect(&self, result: Result<ConnectInfo, ApiError>) {
        *self.connect_result.lock().unwrap() = Some(result);
    }

    pub fn set_disconnect(&self, result: Result<bool, ApiError>) {
        *self.disconnect_result.lock().unwrap() = Some(result);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkBackend for StubBackend {
    async fn login_url(&self, _user_id: &str) -> Result<String, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok("https://login.microsoftonline.example/authorize".to_string()))
    }

    async fn connect(&self, _user_id: &str, _code: &str) -> Result<ConnectInfo, ApiError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| {
                Ok(ConnectInfo {
                    expires_in: Some(3600),
                    refresh_token_expires_in: Some(86400),
                })
            })
    }

    async fn token_status(&self, _user_id: &str) -> Result<TokenStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback_status.lock().unwrap().clone()),
        }
    }

    async fn disconnect(&self, _user_id: &str) -> Result<bool, ApiError> {
        self.disconnect_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Ok(true))
    }
}

/// In-memory [`AuthSurface`] recording opens/closes and broadcasting
/// pushed messages to every subscriber.
pub struct TestSurface {
    origin: String,
    senders: Mutex<Vec<mpsc::UnboundedSender<AuthMessage>>>,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<PopupHandle>>,
    next_popup: AtomicU64,
}

impl TestSurface {
    pub fn new() -> Self {
        Self {
            origin: "https://app.outdial.test".to_string(),
            senders: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            next_popup: AtomicU64::new(0),
        }
    }

    /// Deliver a message to every live subscriber.
    pub fn push(&self, msg: AuthMessage) {
        self.senders
            .lock()
            .unwrap()
            .retain(|tx| tx.send(msg.clone()).is_ok());
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.lock().unwrap().len()
    }
}

impl AuthSurface for TestSurface {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn open(&self, url: &str) -> Result<PopupHandle, LinkError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(PopupHandle(self.next_popup.fetch_add(1, Ordering::Relaxed)))
    }

    fn close(&self, popup: PopupHandle) {
        self.closed.lock().unwrap().push(popup);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        rx
    }
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

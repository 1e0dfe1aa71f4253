//! External auth window abstraction.
//!
//! The handshake coordinator never touches a browser directly. It talks to
//! an [`AuthSurface`]: open an authorization URL, subscribe to the callback
//! message channel, close the window when done. Production uses
//! [`LoopbackSurface`] -- the system browser plus a loopback HTTP listener
//! that captures the provider's redirect and feeds it back as an
//! origin-tagged message. Tests substitute an in-memory surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LinkError;

/// Payload discriminator of a recognized authorization callback.
pub const AUTH_CALLBACK_KIND: &str = "microsoft_auth_callback";

/// A message delivered on the surface's callback channel.
///
/// Origin is a security boundary: the coordinator discards any message
/// whose origin differs from the surface's own.
#[derive(Debug, Clone)]
pub struct AuthMessage {
    pub origin: String,
    pub kind: String,
    pub code: Option<String>,
}

impl AuthMessage {
    /// A well-formed callback message from the given origin.
    pub fn callback(origin: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            kind: AUTH_CALLBACK_KIND.to_string(),
            code: Some(code.into()),
        }
    }
}

/// Opaque handle to an opened auth window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupHandle(pub(crate) u64);

/// Narrow interface to the external authorization window.
pub trait AuthSurface: Send + Sync {
    /// The origin this surface stamps on its own callback messages.
    fn origin(&self) -> &str;

    /// Navigate a new window to the authorization URL.
    fn open(&self, url: &str) -> Result<PopupHandle, LinkError>;

    /// Close a previously opened window if still open. Best effort.
    fn close(&self, popup: PopupHandle);

    /// Subscribe to callback messages. Each subscriber gets its own
    /// receiver; dropping it ends the subscription.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthMessage>;
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<AuthMessage>>>>;

/// System-browser surface with a loopback callback listener.
///
/// `open` launches the default browser and makes sure a listener is
/// accepting on `127.0.0.1:{port}`. When the identity provider redirects
/// to `/callback?code=...`, the listener answers with a small
/// close-this-tab page and broadcasts the code to subscribers.
pub struct LoopbackSurface {
    origin: String,
    port: u16,
    subscribers: Subscribers,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
    next_popup: AtomicU64,
}

impl LoopbackSurface {
    pub fn new(port: u16) -> Self {
        Self {
            origin: format!("http://127.0.0.1:{port}"),
            port,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            listener: Mutex::new(None),
            next_popup: AtomicU64::new(0),
        }
    }

    /// Spawn the accept loop unless one is already running.
    fn ensure_listener(&self) -> Result<(), LinkError> {
        let Ok(mut guard) = self.listener.lock() else {
            return Err(LinkError::Surface("listener lock poisoned".into()));
        };
        if guard.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let std_listener = std::net::TcpListener::bind(("127.0.0.1", self.port))
            .map_err(|e| LinkError::Surface(e.to_string()))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| LinkError::Surface(e.to_string()))?;
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| LinkError::Surface(e.to_string()))?;

        *guard = Some(tokio::spawn(accept_loop(
            listener,
            self.origin.clone(),
            Arc::clone(&self.subscribers),
        )));
        Ok(())
    }
}

impl AuthSurface for LoopbackSurface {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn open(&self, url: &str) -> Result<PopupHandle, LinkError> {
        self.ensure_listener()?;
        open::that(url).map_err(|e| LinkError::Surface(e.to_string()))?;
        Ok(PopupHandle(self.next_popup.fetch_add(1, Ordering::Relaxed)))
    }

    fn close(&self, popup: PopupHandle) {
        // A system-browser tab cannot be closed remotely; the callback
        // page closes itself.
        debug!(?popup, "close requested for external browser window");
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }
}

impl Drop for LoopbackSurface {
    fn drop(&mut self) {
        if let Ok(guard) = self.listener.lock() {
            if let Some(task) = guard.as_ref() {
                task.abort();
            }
        }
    }
}

const CALLBACK_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
<html><body><h2>Account linked.</h2><p>You can close this tab.</p>\
<script>window.close()</script></body></html>";

async fn accept_loop(listener: TcpListener, origin: String, subscribers: Subscribers) {
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("callback listener accept failed: {e}");
                continue;
            }
        };

        let mut buf = [0u8; 4096];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("callback read failed: {e}");
                continue;
            }
        };

        let request = String::from_utf8_lossy(&buf[..n]);
        let code = extract_code(&request);
        if let Err(e) = stream.write_all(CALLBACK_RESPONSE.as_bytes()).await {
            warn!("callback response write failed: {e}");
        }

        match code {
            Some(code) => {
                debug!(%peer, "authorization callback received");
                broadcast(&subscribers, AuthMessage::callback(origin.clone(), code));
            }
            None => debug!(%peer, "ignoring request without authorization code"),
        }
    }
}

fn broadcast(subscribers: &Subscribers, msg: AuthMessage) {
    if let Ok(mut subs) = subscribers.lock() {
        subs.retain(|tx| tx.send(msg.clone()).is_ok());
    }
}

/// Pull the `code` query parameter out of the redirect request line.
fn extract_code(request: &str) -> Option<String> {
    let path = request.lines().next()?.split_whitespace().nth(1)?;
    let parsed = url::Url::parse(&format!("http://127.0.0.1{path}")).ok()?;
    let (_, code) = parsed.query_pairs().find(|(k, _)| k == "code")?;
    Some(code.into_owned())
}

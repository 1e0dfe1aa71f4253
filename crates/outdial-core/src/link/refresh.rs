//! Scheduled token-validity checks.
//!
//! A background loop verifies the cached token on a long interval, plus an
//! immediate check shortly after start and whenever the application regains
//! the user's attention. Every trigger path funnels through one guarded
//! check so overlapping timers and focus events collapse into a single
//! backend call. The loop never exchanges refresh tokens itself; the
//! backend refreshes transparently on its own calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::debug;

use crate::config::LinkConfig;
use crate::link::status::ConnectionTracker;

/// Collapses overlapping triggers: at most one check in flight, and at
/// most one check per cooldown window.
struct RefreshGuard {
    in_flight: AtomicBool,
    last_check: Mutex<Option<Instant>>,
}

impl RefreshGuard {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            last_check: Mutex::new(None),
        }
    }

    /// Claim the right to run a check. Stamps the cooldown watermark on
    /// success; the caller must call [`RefreshGuard::finish`] afterwards.
    fn begin(&self, cooldown: Duration) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("token check already in progress, skipping");
            return false;
        }
        let Ok(mut last) = self.last_check.lock() else {
            self.in_flight.store(false, Ordering::SeqCst);
            return false;
        };
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < cooldown {
                debug!("token check cooldown active, skipping");
                self.in_flight.store(false, Ordering::SeqCst);
                return false;
            }
        }
        *last = Some(now);
        true
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Periodic token-status checker.
pub struct RefreshScheduler {
    tracker: ConnectionTracker,
    timing: LinkConfig,
}

impl RefreshScheduler {
    pub fn new(tracker: ConnectionTracker, timing: LinkConfig) -> Self {
        Self { tracker, timing }
    }

    /// Spawn the check loop. The returned handle owns it: `stop()` or
    /// dropping the handle cancels the task, so repeated start/stop cycles
    /// cannot leak timers.
    pub fn start(self) -> RefreshHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();

        let task = tokio::spawn(async move {
            let guard = RefreshGuard::new();
            let start = Instant::now();
            let mut ticker = interval_at(
                start + self.timing.check_interval(),
                self.timing.check_interval(),
            );

            tokio::time::sleep_until(start + self.timing.initial_check_delay()).await;
            self.check(&guard).await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("running scheduled token check");
                        self.check(&guard).await;
                    }
                    msg = trigger_rx.recv() => match msg {
                        Some(()) => {
                            debug!("attention regained, checking token");
                            self.check(&guard).await;
                        }
                        None => break,
                    },
                }
            }
        });

        RefreshHandle {
            trigger: trigger_tx,
            task,
        }
    }

    /// The single guarded check every trigger path funnels through.
    async fn check(&self, guard: &RefreshGuard) {
        if !guard.begin(self.timing.check_cooldown()) {
            return;
        }
        if !self.tracker.cache().is_connected() {
            debug!("no link established, skipping token check");
            guard.finish();
            return;
        }
        // Errors are already translated to a cleared cache inside the
        // tracker; nothing to surface from a background check.
        let _ = self.tracker.is_token_valid().await;
        guard.finish();
    }
}

/// Owning handle for a running scheduler.
pub struct RefreshHandle {
    trigger: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Request an immediate check, e.g. on window focus. Subject to the
    /// same cooldown as timed checks.
    pub fn notify_focus(&self) {
        let _ = self.trigger.send(());
    }

    /// Cancel the check loop.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//! Tests for the handshake coordinator's message/poll race, supersession,
//! and failure taxonomy. Timer-driven paths run under paused tokio time.

use std::sync::Arc;

use tokio::time::Duration;

use crate::api::TokenStatus;
use crate::cache::{LinkCache, MemoryCache};
use crate::config::LinkConfig;
use crate::error::{ApiError, LinkError};
use crate::link::handshake::{HandshakeCoordinator, HandshakeOutcome, HandshakeState};
use crate::link::status::ConnectionTracker;
use crate::link::surface::AuthMessage;
use crate::link::testutil::{settle, StubBackend, TestSurface};

struct Harness {
    backend: Arc<StubBackend>,
    surface: Arc<TestSurface>,
    cache: LinkCache,
    coordinator: Arc<HandshakeCoordinator>,
    tracker: ConnectionTracker,
}

fn harness() -> Harness {
    let backend = Arc::new(StubBackend::new());
    let surface = Arc::new(TestSurface::new());
    let cache = LinkCache::new(Arc::new(MemoryCache::new()));
    let coordinator = Arc::new(HandshakeCoordinator::new(
        backend.clone(),
        cache.clone(),
        surface.clone(),
        "u1",
        LinkConfig::default(),
    ));
    let tracker = ConnectionTracker::new(backend.clone(), cache.clone(), "u1");
    Harness {
        backend,
        surface,
        cache,
        coordinator,
        tracker,
    }
}

fn valid_status() -> TokenStatus {
    TokenStatus {
        valid: true,
        exists: Some(true),
        expires_in: Some(3600),
        refresh_token_expires_in: Some(86400),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn message_path_completes_without_polling() {
    let h = harness();
    let coordinator = h.coordinator.clone();
    let attempt = tokio::spawn(async move { coordinator.connect().await });
    settle().await;

    assert_eq!(h.coordinator.state(), HandshakeState::AwaitingCallback);
    assert_eq!(h.surface.opened_count(), 1);

    h.surface
        .push(AuthMessage::callback(h.surface.origin(), "auth-code-1"));
    let outcome = attempt.await.unwrap().unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.coordinator.state(), HandshakeState::Completed);
    assert_eq!(h.backend.connect_calls(), 1);
    assert_eq!(h.surface.closed_count(), 1);
    assert!(h.cache.is_connected());
    assert!(h.cache.last_refreshed_at().is_some());

    // Nothing keeps polling after completion: no extra status calls, no
    // second exchange, no conflicting writes.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.backend.status_calls(), 0);
    assert_eq!(h.backend.connect_calls(), 1);
    assert!(h.cache.is_connected());
}

#[tokio::test(start_paused = true)]
async fn foreign_origin_message_is_discarded() {
    let h = harness();
    let coordinator = h.coordinator.clone();
    let attempt = tokio::spawn(async move { coordinator.connect().await });
    settle().await;

    h.surface
        .push(AuthMessage::callback("https://evil.example", "stolen-code"));
    settle().await;

    // Still awaiting: no exchange, no state change.
    assert_eq!(h.coordinator.state(), HandshakeState::AwaitingCallback);
    assert_eq!(h.backend.connect_calls(), 0);
    assert!(!h.cache.is_connected());

    h.coordinator.cancel();
    let outcome = attempt.await.unwrap().unwrap();
    assert_eq!(outcome, HandshakeOutcome::Superseded);
}

#[tokio::test(start_paused = true)]
async fn poll_path_completes_when_status_turns_valid() {
    let h = harness();
    h.backend.push_status(Ok(TokenStatus {
        valid: false,
        exists: Some(false),
        ..Default::default()
    }));
    h.backend.push_status(Ok(valid_status()));

    let outcome = h.coordinator.connect().await.unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.backend.status_calls(), 2);
    // Poll wins without an exchange; the window closes itself.
    assert_eq!(h.backend.connect_calls(), 0);
    assert!(h.cache.is_connected());
    assert_eq!(h.coordinator.state(), HandshakeState::Completed);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried() {
    let h = harness();
    h.backend
        .push_status(Err(ApiError::MissingField { field: "valid" }));
    h.backend.push_status(Ok(valid_status()));

    let outcome = h.coordinator.connect().await.unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.backend.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn times_out_after_bounded_polls() {
    let h = harness();
    // Fallback status stays {valid:false}; no message ever arrives.
    let before = tokio::time::Instant::now();
    let err = h.coordinator.connect().await.unwrap_err();
    let elapsed = tokio::time::Instant::now() - before;

    assert!(matches!(err, LinkError::Timeout));
    assert_eq!(
        err.to_string(),
        "Authentication timed out. Please try again."
    );
    // 20 polls x 10 s.
    assert_eq!(h.backend.status_calls(), 20);
    assert!(elapsed >= Duration::from_secs(200));
    assert!(elapsed < Duration::from_secs(210));
    assert_eq!(h.coordinator.state(), HandshakeState::TimedOut);
    assert!(!h.cache.is_connected());
}

#[tokio::test(start_paused = true)]
async fn exchange_envelope_error_fails_attempt() {
    let h = harness();
    h.backend
        .set_connect(Err(ApiError::Envelope("invalid_grant".to_string())));

    let coordinator = h.coordinator.clone();
    let attempt = tokio::spawn(async move { coordinator.connect().await });
    settle().await;

    h.surface
        .push(AuthMessage::callback(h.surface.origin(), "rejected-code"));
    let err = attempt.await.unwrap().unwrap_err();

    match err {
        LinkError::ExchangeFailed(reason) => assert_eq!(reason, "invalid_grant"),
        other => panic!("expected ExchangeFailed, got {other:?}"),
    }
    assert_eq!(h.coordinator.state(), HandshakeState::Failed);
    assert!(!h.cache.is_connected());
}

#[tokio::test(start_paused = true)]
async fn initiation_failure_opens_no_window() {
    let h = harness();
    h.backend
        .set_login(Err(ApiError::MissingField { field: "authUrl" }));

    let err = h.coordinator.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::InitiationFailed(_)));
    assert_eq!(h.surface.opened_count(), 0);
    assert_eq!(h.coordinator.state(), HandshakeState::Failed);
}

#[tokio::test(start_paused = true)]
async fn second_attempt_supersedes_first() {
    let h = harness();

    let first = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.connect().await })
    };
    settle().await;

    let second = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.connect().await })
    };
    settle().await;

    // Both attempts are subscribed; only the live one may act on this.
    h.surface
        .push(AuthMessage::callback(h.surface.origin(), "auth-code-2"));

    let first_outcome = first.await.unwrap().unwrap();
    let second_outcome = second.await.unwrap().unwrap();

    assert_eq!(first_outcome, HandshakeOutcome::Superseded);
    assert!(matches!(second_outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.backend.connect_calls(), 1);
    assert!(h.cache.is_connected());
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_attempt_and_leaves_window_open() {
    let h = harness();
    let coordinator = h.coordinator.clone();
    let attempt = tokio::spawn(async move { coordinator.connect().await });
    settle().await;
    assert_eq!(h.surface.opened_count(), 1);

    h.coordinator.cancel();
    let outcome = attempt.await.unwrap().unwrap();

    assert_eq!(outcome, HandshakeOutcome::Superseded);
    assert_eq!(h.surface.closed_count(), 0);
    assert_eq!(h.coordinator.state(), HandshakeState::Idle);
}

#[tokio::test(start_paused = true)]
async fn connect_or_refresh_skips_handshake_when_refresh_succeeds() {
    let h = harness();
    h.cache.mark_expired();
    h.backend.push_status(Ok(valid_status()));

    let outcome = h.coordinator.connect_or_refresh(&h.tracker).await.unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.surface.opened_count(), 0);
    assert_eq!(h.backend.login_calls(), 0);
    assert!(h.cache.is_connected());
    assert!(h.cache.last_refreshed_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn connect_or_refresh_falls_through_to_handshake() {
    let h = harness();
    h.cache.mark_expired();
    h.backend.push_status(Ok(TokenStatus {
        valid: false,
        exists: Some(true),
        is_expired: Some(true),
        ..Default::default()
    }));

    let coordinator = h.coordinator.clone();
    let tracker = h.tracker.clone();
    let attempt =
        tokio::spawn(async move { coordinator.connect_or_refresh(&tracker).await });
    settle().await;
    assert_eq!(h.surface.opened_count(), 1);

    h.surface
        .push(AuthMessage::callback(h.surface.origin(), "auth-code-3"));
    let outcome = attempt.await.unwrap().unwrap();

    assert!(matches!(outcome, HandshakeOutcome::Completed { .. }));
    assert_eq!(h.backend.connect_calls(), 1);
}

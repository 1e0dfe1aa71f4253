//! HTTP client for the platform backend's Microsoft-auth endpoints.
//!
//! The four link endpoints (login-url, connect, token-status, disconnect)
//! sit behind the [`LinkBackend`] trait so the link state machine can be
//! exercised against a scripted stub. Calendar and Graph operations are
//! concrete methods on [`HttpBackend`] only -- nothing in the link
//! lifecycle depends on them.
//!
//! Envelope rule: the backend signals some failures inside an HTTP 2xx
//! response, as an `error` field at the top level or nested under `data`.
//! Those are failures, not successes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;

/// Backend-reported token validity/expiry for a user.
///
/// Field naming is the wire contract (mixed camel/snake, as deployed).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenStatus {
    pub valid: bool,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default, rename = "isExpired")]
    pub is_expired: Option<bool>,
    /// Seconds until access-token expiry.
    #[serde(default, rename = "expiresIn")]
    pub expires_in: Option<i64>,
    #[serde(default, rename = "expiresAt")]
    pub expires_at: Option<String>,
    /// Seconds until refresh-token expiry.
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
}

/// Expiry info returned by a successful code exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectInfo {
    pub expires_in: Option<i64>,
    pub refresh_token_expires_in: Option<i64>,
}

/// The platform backend's account-link operations.
#[async_trait]
pub trait LinkBackend: Send + Sync {
    /// Fetch the Microsoft authorization URL for this user.
    async fn login_url(&self, user_id: &str) -> Result<String, ApiError>;

    /// Exchange an authorization code for a completed connection.
    async fn connect(&self, user_id: &str, code: &str) -> Result<ConnectInfo, ApiError>;

    /// Ask the backend whether the stored token is currently usable.
    async fn token_status(&self, user_id: &str) -> Result<TokenStatus, ApiError>;

    /// Remove the stored link. Returns the backend's `success` flag.
    async fn disconnect(&self, user_id: &str) -> Result<bool, ApiError>;
}

/// reqwest implementation of [`LinkBackend`] plus the calendar/Graph
/// operations the link exists to serve.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create an Outlook calendar event through the stored token.
    pub async fn create_calendar_event(
        &self,
        user_id: &str,
        event_details: &Value,
    ) -> Result<Value, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/auth/microsoft/calendar/event"))
            .json(&json!({ "user_id": user_id, "event_details": event_details }))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Call Microsoft Graph through the backend proxy. A 401 means the
    /// stored token expired and the user must reconnect.
    pub async fn call_graph_api(
        &self,
        user_id: &str,
        endpoint: &str,
        method: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/auth/microsoft/graph-api/{endpoint}")))
            .json(&json!({ "user_id": user_id, "method": method, "body": body }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::TokenExpired);
        }
        if !status.is_success() {
            // Prefer the backend's own reason when the error body carries one.
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let msg = body
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("backend answered {status}"));
            return Err(ApiError::Graph(msg));
        }
        let body: Value = resp.json().await?;
        if let Some(msg) = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return Err(ApiError::Graph(msg.to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl LinkBackend for HttpBackend {
    async fn login_url(&self, user_id: &str) -> Result<String, ApiError> {
        let body: Value = self
            .client
            .get(self.url(&format!("/api/auth/microsoft/login/{user_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.get("authUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ApiError::MissingField { field: "authUrl" })
    }

    async fn connect(&self, user_id: &str, code: &str) -> Result<ConnectInfo, ApiError> {
        let body: Value = self
            .client
            .post(self.url(&format!("/api/auth/microsoft/connect/{user_id}")))
            .json(&json!({ "code": code }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(message) = envelope_error(&body) {
            return Err(ApiError::Envelope(message));
        }

        let data = body.get("data");
        Ok(ConnectInfo {
            expires_in: data
                .and_then(|d| d.get("expiresIn"))
                .and_then(Value::as_i64),
            refresh_token_expires_in: data
                .and_then(|d| d.get("refresh_token_expires_in"))
                .and_then(Value::as_i64),
        })
    }

    async fn token_status(&self, user_id: &str) -> Result<TokenStatus, ApiError> {
        let status = self
            .client
            .get(self.url(&format!("/api/auth/microsoft/token/status/{user_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }

    async fn disconnect(&self, user_id: &str) -> Result<bool, ApiError> {
        let body: Value = self
            .client
            .post(self.url(&format!("/api/auth/microsoft/disconnect/{user_id}")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.get("success").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// An `error` field at the top level or under `data` fails the call even on
/// an HTTP 2xx envelope.
fn envelope_error(body: &Value) -> Option<String> {
    let err = body
        .get("error")
        .or_else(|| body.get("data").and_then(|d| d.get("error")))?;
    Some(match err {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn login_url_returns_auth_url() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/microsoft/login/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authUrl":"https://login.microsoftonline.com/authorize?x=1"}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let url = backend.login_url("u1").await.unwrap();
        assert!(url.starts_with("https://login.microsoftonline.com/"));
    }

    #[tokio::test]
    async fn login_url_missing_field_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/microsoft/login/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let err = backend.login_url("u1").await.unwrap_err();
        assert!(matches!(err, ApiError::MissingField { field: "authUrl" }));
    }

    #[tokio::test]
    async fn connect_success_reads_expiry_info() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/microsoft/connect/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"data":{"expiresIn":3600,"refresh_token_expires_in":86400}}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let info = backend.connect("u1", "code123").await.unwrap();
        assert_eq!(info.expires_in, Some(3600));
        assert_eq!(info.refresh_token_expires_in, Some(86400));
    }

    #[tokio::test]
    async fn connect_error_nested_under_data_fails() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/microsoft/connect/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"data":{"error":"invalid_grant"}}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let err = backend.connect("u1", "badcode").await.unwrap_err();
        match err {
            ApiError::Envelope(msg) => assert_eq!(msg, "invalid_grant"),
            other => panic!("expected Envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_top_level_error_fails() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/microsoft/connect/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"consent_required"}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let err = backend.connect("u1", "code").await.unwrap_err();
        assert!(matches!(err, ApiError::Envelope(m) if m == "consent_required"));
    }

    #[tokio::test]
    async fn token_status_parses_mixed_field_names() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/microsoft/token/status/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"valid":false,"exists":true,"isExpired":true,"expiresIn":0,"refresh_token_expires_in":500}"#,
            )
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let status = backend.token_status("u1").await.unwrap();
        assert!(!status.valid);
        assert_eq!(status.exists, Some(true));
        assert_eq!(status.is_expired, Some(true));
        assert_eq!(status.refresh_token_expires_in, Some(500));
    }

    #[tokio::test]
    async fn disconnect_returns_success_flag() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/microsoft/disconnect/u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        assert!(backend.disconnect("u1").await.unwrap());
    }

    #[tokio::test]
    async fn graph_api_maps_401_to_token_expired() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/auth/microsoft/graph-api/me")
            .with_status(401)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let err = backend
            .call_graph_api("u1", "me", "GET", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenExpired));
    }
}

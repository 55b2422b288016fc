// Request envelope over the fetch-style collaborator boundary.
//
// The actual HTTP driver is outside this crate; the [`Api`] trait is the
// opaque async call the core depends on. What lives here is the protocol
// around it: token injection, status classification, and the error taxonomy
// (server faults notify the user *and* propagate, because the operation's
// outcome is unknown; validation failures are logged per item).
use crate::session::Session;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use tabula_common::UserId;

/// Raw reply from the transport: an HTTP-like status code plus a JSON body.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub code: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn ok(body: Value) -> Self {
        Self { code: 200, body }
    }
}

/// Opaque async POST boundary. Implementations own the socket/HTTP details;
/// the core never sees them.
#[async_trait]
pub trait Api: Send + Sync {
    async fn post(&self, endpoint: &str, body: Value) -> Result<ApiReply>;
}

/// User-visible notification hook (the toast surface of the host UI).
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Fallback notifier that routes through the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, message: &str) {
        tracing::error!(message, "user notification");
    }
}

/// Application-level reply status, distinct from the transport code.
///
/// `Partial` is not a failure: it marks a permission-filtered view (name
/// visible, body redacted) and callers render a redacted placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Partial,
    Other(String),
}

impl Status {
    pub fn parse(body: &Value) -> Status {
        match body.get("status").and_then(Value::as_str) {
            Some("success") => Status::Success,
            Some("partial") => Status::Partial,
            Some(other) => Status::Other(other.to_string()),
            None => Status::Other("missing status".to_string()),
        }
    }
}

/// Server-supplied failure reason, falling back to the raw status.
pub fn failure_reason(body: &Value) -> String {
    body.get("reason")
        .and_then(Value::as_str)
        .or_else(|| body.get("status").and_then(Value::as_str))
        .unwrap_or("unknown error")
        .to_string()
}

/// Token-injecting request wrapper shared by every component that talks to
/// the authority outside the persistent connection.
pub struct RequestClient {
    api: Arc<dyn Api>,
    notifier: Arc<dyn Notifier>,
    token: RwLock<Option<String>>,
}

impl RequestClient {
    pub fn new(api: Arc<dyn Api>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            token: RwLock::new(None),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    /// POST a JSON body with the session token injected.
    ///
    /// Returns the reply body for 4xx-class replies too; application status
    /// lives in the body (`status` field) and is the caller's to classify.
    /// Server faults are the exception: the outcome is unknown, so they
    /// notify the user and propagate as errors.
    pub async fn request(&self, endpoint: &str, body: Value) -> Result<Value> {
        let mut body = if body.is_object() { body } else { json!({}) };
        if let Some(token) = self.token() {
            body["token"] = Value::String(token);
        }
        tracing::debug!(endpoint, "api request");
        let reply = self
            .api
            .post(endpoint, body)
            .await
            .with_context(|| format!("api request: {endpoint}"))?;
        if (500..600).contains(&reply.code) {
            self.notifier
                .error("Encountered an error making an API request.");
            bail!("api error: {} {endpoint}", reply.code);
        }
        if reply.code == 422 {
            if let Some(detail) = reply.body.get("detail").and_then(Value::as_array) {
                for item in detail {
                    tracing::error!(%item, endpoint, "request validation failed");
                }
            }
        }
        Ok(reply.body)
    }

    /// Authenticate and build a [`Session`]. Clears any previous token first
    /// so a failed login cannot ride on stale credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        self.set_token(None);
        let body = self
            .request("/login", json!({"username": username, "password": password}))
            .await?;
        match Status::parse(&body) {
            Status::Success => {
                let token = body
                    .get("token")
                    .and_then(Value::as_str)
                    .context("login reply missing token")?
                    .to_string();
                let user = body.get("user").cloned().unwrap_or(Value::Null);
                let user_id: UserId = user
                    .get("id")
                    .and_then(Value::as_str)
                    .context("login reply missing user id")?
                    .parse()?;
                let session = Session {
                    token: token.clone(),
                    user_id,
                    username: user
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    gm: user.get("is_gm").and_then(Value::as_bool).unwrap_or(false),
                };
                self.set_token(Some(token));
                Ok(session)
            }
            _ => bail!("login failed: {}", failure_reason(&body)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{RecordingNotifier, ScriptedApi};
    use super::*;

    #[tokio::test]
    async fn request_injects_the_session_token() {
        let api = ScriptedApi::new(vec![ApiReply::ok(json!({"status": "success"}))]);
        let client = RequestClient::new(api.clone(), Arc::new(LogNotifier));
        client.set_token(Some("tkn-9".to_string()));

        client
            .request("/note/get", json!({"id": "n1"}))
            .await
            .expect("request");

        let requests = api.requests.lock().expect("lock");
        assert_eq!(requests[0].0, "/note/get");
        assert_eq!(requests[0].1["token"], json!("tkn-9"));
        assert_eq!(requests[0].1["id"], json!("n1"));
    }

    #[tokio::test]
    async fn server_fault_notifies_and_propagates() {
        let api = ScriptedApi::new(vec![ApiReply {
            code: 502,
            body: json!({}),
        }]);
        let notifier = RecordingNotifier::new();
        let client = RequestClient::new(api, notifier.clone());

        let err = client
            .request("/map/update", json!({}))
            .await
            .expect_err("5xx must propagate");
        assert!(err.to_string().contains("502"));
        assert_eq!(notifier.messages.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_returns_the_body() {
        let api = ScriptedApi::new(vec![ApiReply {
            code: 422,
            body: json!({"detail": [{"msg": "field required", "loc": ["body", "id"]}]}),
        }]);
        let client = RequestClient::new(api, Arc::new(LogNotifier));

        let body = client
            .request("/combat/update", json!({}))
            .await
            .expect("422 is not a transport failure");
        assert!(body.get("detail").is_some());
    }

    #[tokio::test]
    async fn login_success_builds_a_session() {
        let user_id = UserId::new();
        let api = ScriptedApi::new(vec![ApiReply::ok(json!({
            "status": "success",
            "token": "fresh-token",
            "user": {"id": user_id.to_string(), "name": "alice", "is_gm": true},
        }))]);
        let client = RequestClient::new(api.clone(), Arc::new(LogNotifier));
        client.set_token(Some("stale".to_string()));

        let session = client.login("alice", "hunter2").await.expect("login");
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.username, "alice");
        assert!(session.gm);
        assert_eq!(client.token().as_deref(), Some("fresh-token"));

        // The stale token must not be injected into the login request itself.
        let requests = api.requests.lock().expect("lock");
        assert!(requests[0].1.get("token").is_none());
    }

    #[tokio::test]
    async fn login_failure_surfaces_the_reason() {
        let api = ScriptedApi::new(vec![ApiReply::ok(json!({
            "status": "error",
            "reason": "invalid credentials",
        }))]);
        let client = RequestClient::new(api, Arc::new(LogNotifier));
        let err = client.login("alice", "wrong").await.expect_err("denied");
        assert!(err.to_string().contains("invalid credentials"));
        assert_eq!(client.token(), None);
    }

    #[test]
    fn status_classification() {
        assert_eq!(Status::parse(&json!({"status": "success"})), Status::Success);
        assert_eq!(Status::parse(&json!({"status": "partial"})), Status::Partial);
        assert_eq!(
            Status::parse(&json!({"status": "no such character"})),
            Status::Other("no such character".to_string())
        );
        assert_eq!(
            Status::parse(&json!({})),
            Status::Other("missing status".to_string())
        );
    }
}

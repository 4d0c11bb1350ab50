//! HTTP gateway against a Supabase-style backend
//!
//! - Auth: anonymous sign-up, refresh-token grant
//! - Tables: PostgREST under `/rest/v1/<table>`
//! - Procedures: `/rest/v1/rpc/<function>`
//! - Realtime: websocket under `/realtime/v1/websocket`

use super::realtime::SocketChannel;
use super::{
    unix_now, Filter, Gateway, GatewayError, RealtimeChannel, Session, SessionStore, User,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Token response from the auth endpoints.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: User,
}

impl AuthResponse {
    fn into_session(self, now: i64) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + self.expires_in,
            user: self.user,
        }
    }
}

/// PostgREST / GoTrue error body.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default, alias = "msg", alias = "error_description")]
    message: Option<String>,
}

/// Gateway speaking HTTP to the managed backend.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    /// Held across check-and-refresh so concurrent callers share one result
    auth: Mutex<()>,
    store: Option<Mutex<Box<dyn SessionStore>>>,
}

impl HttpGateway {
    /// Create a gateway for `base_url` with the public (anon) API key.
    pub fn new(base_url: &Url, anon_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: Mutex::new(None),
            auth: Mutex::new(()),
            store: None,
        })
    }

    /// Persist sessions through `store`, restoring any saved one.
    pub fn with_session_store(mut self, store: Box<dyn SessionStore>) -> Self {
        if let Some(saved) = store.load_session() {
            debug!(user = %saved.user.id, "restored saved session");
            if let Ok(mut session) = self.session.lock() {
                *session = Some(saved);
            }
        }
        self.store = Some(Mutex::new(store));
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Websocket endpoint derived from the REST base URL.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", ws_base, self.anon_key)
    }

    fn store_session(&self, session: Option<&Session>) {
        if let Ok(mut current) = self.session.lock() {
            *current = session.cloned();
        }
        if let Some(store) = &self.store {
            if let Ok(store) = store.lock() {
                match session {
                    Some(session) => store.save_session(session),
                    None => store.clear_session(),
                }
            }
        }
    }

    fn sign_in_anonymously(&self) -> Result<Session, GatewayError> {
        let response = self
            .client
            .post(self.endpoint("auth/v1/signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({}))
            .send()
            .map_err(transport)?;
        let auth: AuthResponse = serde_json::from_value(read_json(response)?)?;
        let session = auth.into_session(unix_now());
        info!(user = %session.user.id, "signed in anonymously");
        Ok(session)
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        let response = self
            .client
            .post(self.endpoint("auth/v1/token?grant_type=refresh_token"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .map_err(transport)?;
        let auth: AuthResponse = serde_json::from_value(read_json(response)?)?;
        Ok(auth.into_session(unix_now()))
    }

    fn cached_session(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    /// A fresh session, refreshing or re-creating it as needed.
    ///
    /// The saved identity is only discarded when the auth server rejects the
    /// refresh token. Any other failure keeps it and is returned.
    fn session(&self) -> Result<Session, GatewayError> {
        let now = unix_now();
        if let Some(session) = self.cached_session().filter(|s| s.is_fresh(now)) {
            return Ok(session);
        }

        let _auth = self
            .auth
            .lock()
            .map_err(|_| GatewayError::NoSession)?;

        // Another caller may have refreshed while we waited
        let current = self.cached_session();
        if let Some(session) = &current {
            if session.is_fresh(unix_now()) {
                return Ok(session.clone());
            }
            match self.refresh(&session.refresh_token) {
                Ok(refreshed) => {
                    debug!(user = %refreshed.user.id, "refreshed session");
                    self.store_session(Some(&refreshed));
                    return Ok(refreshed);
                }
                Err(e) if e.is_auth_rejection() => {
                    warn!(error = %e, "refresh token rejected, signing in again");
                    self.store_session(None);
                }
                Err(e) => {
                    warn!(error = %e, "session refresh failed, keeping saved session");
                    return Err(e);
                }
            }
        }

        let session = self.sign_in_anonymously()?;
        self.store_session(Some(&session));
        Ok(session)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, GatewayError> {
        let session = self.session()?;
        Ok(request
            .header("apikey", &self.anon_key)
            .bearer_auth(session.access_token))
    }
}

impl Gateway for HttpGateway {
    fn ensure_session(&self) -> Result<User, GatewayError> {
        self.session().map(|s| s.user)
    }

    fn current_user(&self) -> Option<User> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.user.clone()))
    }

    fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .client
            .post(self.endpoint(&format!("rest/v1/{}", table)))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.authorized(request)?.send().map_err(transport)?;
        rows(read_json(response)?)
    }

    fn select(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>, GatewayError> {
        let mut query = vec![("select".to_string(), columns.replace(' ', ""))];
        query.extend(eq_filters(filters));
        let request = self
            .client
            .get(self.endpoint(&format!("rest/v1/{}", table)))
            .query(&query);
        let response = self.authorized(request)?.send().map_err(transport)?;
        rows(read_json(response)?)
    }

    fn update(
        &self,
        table: &str,
        patch: Value,
        filters: &[Filter],
    ) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .client
            .patch(self.endpoint(&format!("rest/v1/{}", table)))
            .query(&eq_filters(filters))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.authorized(request)?.send().map_err(transport)?;
        rows(read_json(response)?)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), GatewayError> {
        let request = self
            .client
            .delete(self.endpoint(&format!("rest/v1/{}", table)))
            .query(&eq_filters(filters));
        let response = self.authorized(request)?.send().map_err(transport)?;
        read_json(response).map(|_| ())
    }

    fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError> {
        let request = self
            .client
            .post(self.endpoint(&format!("rest/v1/rpc/{}", function)))
            .json(&args);
        let response = self.authorized(request)?.send().map_err(transport)?;
        read_json(response)
    }

    fn channel(
        &self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn RealtimeChannel>, GatewayError> {
        // Cached token only: this runs on the UI thread
        let token = self.cached_session().map(|s| s.access_token);
        Ok(Box::new(SocketChannel::new(
            self.realtime_url(),
            topic,
            presence_key,
            token,
        )))
    }
}

/// PostgREST query pairs for equality filters: `column=eq.value`.
fn eq_filters(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value)))
        .collect()
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

/// Decode a response body, mapping non-success statuses to `GatewayError::Api`.
fn read_json(response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.text().map_err(transport)?;

    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&body).map_err(GatewayError::from);
    }

    Err(api_error(status.as_u16(), &body))
}

fn api_error(status: u16, body: &str) -> GatewayError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    });
    let message = parsed.message.unwrap_or_else(|| body.trim().to_string());
    GatewayError::Api {
        status,
        code,
        message,
    }
}

fn rows(value: Value) -> Result<Vec<Value>, GatewayError> {
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

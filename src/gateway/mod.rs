//! Remote data gateway: the only path from the client to the backend
//!
//! This module provides:
//! - The [`Gateway`] trait: auth session, table queries, remote procedure
//!   calls and realtime channels
//! - [`HttpGateway`]: Supabase-style REST + websocket implementation
//! - [`MemoryGateway`]: in-process backend used by tests and `--offline`
//!
//! A gateway is constructed once at start-up and handed to the lobby API,
//! the membership poller and the presence binder as an `Arc<dyn Gateway>`.

pub mod http;
pub mod memory;
pub mod realtime;

pub use http::HttpGateway;
pub use memory::MemoryGateway;
pub use realtime::{ChannelEvent, RealtimeChannel};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// PostgreSQL `unique_violation` error code.
pub const UNIQUE_VIOLATION: &str = "23505";

/// An authenticated backend user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
}

/// An auth session as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which the access token is rejected
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    /// Seconds before expiry at which the token is treated as stale.
    pub const REFRESH_MARGIN_SECS: i64 = 60;

    /// Whether the access token is still usable at `now` (unix seconds).
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - Self::REFRESH_MARGIN_SECS > now
    }
}

/// Persistence for the auth session across runs.
pub trait SessionStore: Send {
    fn load_session(&self) -> Option<Session>;
    fn save_session(&self, session: &Session);
    fn clear_session(&self);
}

/// An equality filter on a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Self {
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors returned by any gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The backend answered with an error body
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// The request never produced a response
    Transport(String),
    /// The response could not be decoded
    Decode(String),
    /// No session could be established
    NoSession,
}

impl GatewayError {
    /// True when the backend rejected an insert because the row already exists.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            GatewayError::Api { code, message, .. } => {
                code.as_deref() == Some(UNIQUE_VIOLATION) || message.contains("duplicate")
            }
            _ => false,
        }
    }

    /// True when the auth server refused the credentials themselves.
    ///
    /// Transport failures and 5xx answers say nothing about the token.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, GatewayError::Api { status: 400 | 401 | 403, .. })
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Api {
                status,
                code: Some(code),
                message,
            } => write!(f, "backend error {} ({}): {}", status, code, message),
            GatewayError::Api { status, message, .. } => {
                write!(f, "backend error {}: {}", status, message)
            }
            GatewayError::Transport(e) => write!(f, "request failed: {}", e),
            GatewayError::Decode(e) => write!(f, "unexpected response: {}", e),
            GatewayError::NoSession => write!(f, "no auth session"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

/// Client binding to the managed backend.
///
/// Table operations take JSON rows; typing happens in the lobby module.
pub trait Gateway: Send + Sync {
    /// Make sure a session exists, signing in anonymously if needed.
    fn ensure_session(&self) -> Result<User, GatewayError>;

    /// The user of the current session, if any. Never touches the network.
    fn current_user(&self) -> Option<User>;

    /// Insert a row and return the stored representation.
    fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError>;

    /// Select `columns` (comma separated) from rows matching every filter.
    fn select(&self, table: &str, columns: &str, filters: &[Filter])
        -> Result<Vec<Value>, GatewayError>;

    /// Patch rows matching every filter and return them.
    fn update(&self, table: &str, patch: Value, filters: &[Filter])
        -> Result<Vec<Value>, GatewayError>;

    /// Delete rows matching every filter.
    fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), GatewayError>;

    /// Call a server-side procedure.
    fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError>;

    /// Create (but do not subscribe) a realtime channel.
    fn channel(&self, topic: &str, presence_key: &str)
        -> Result<Box<dyn RealtimeChannel>, GatewayError>;
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at,
            user: User { id: Uuid::new_v4() },
        }
    }

    #[test]
    fn test_session_freshness_respects_margin() {
        assert!(session(1_000).is_fresh(900));
        assert!(!session(1_000).is_fresh(950));
        assert!(!session(1_000).is_fresh(2_000));
    }

    #[test]
    fn test_unique_violation_by_code() {
        let err = GatewayError::Api {
            status: 409,
            code: Some("23505".into()),
            message: "conflict".into(),
        };
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_unique_violation_by_message() {
        let err = GatewayError::Api {
            status: 409,
            code: None,
            message: "duplicate key value violates unique constraint".into(),
        };
        assert!(err.is_unique_violation());
        assert!(!GatewayError::Transport("duplicate".into()).is_unique_violation());
    }

    #[test]
    fn test_filter_eq_stringifies() {
        let id = Uuid::nil();
        assert_eq!(Filter::eq("id", id).value, id.to_string());
    }
}

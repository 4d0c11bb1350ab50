//! In-process backend
//!
//! Emulates the pieces of the managed backend the lobby flow relies on:
//! - `lobbies` and `players` tables with their unique constraints
//! - `find_lobby_by_code` and `get_lobby_members` procedures
//! - presence on realtime channels
//!
//! Several [`MemoryGateway`]s created with [`MemoryGateway::peer`] share one
//! backend, each with its own anonymous user.

use super::realtime::ChannelEvent;
use super::{Filter, Gateway, GatewayError, RealtimeChannel, User, UNIQUE_VIOLATION};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

type Row = Map<String, Value>;

/// Presence metas for one topic, with a version bumped on every change.
#[derive(Default)]
struct Topic {
    version: u64,
    /// (phx_ref, presence key, meta)
    metas: Vec<(String, String, Value)>,
}

#[derive(Default)]
struct Backend {
    tables: HashMap<String, Vec<Row>>,
    topics: HashMap<String, Topic>,
    failing_inserts: HashSet<String>,
    failing_rpcs: HashSet<String>,
    rpc_calls: HashMap<String, usize>,
}

/// Gateway backed by shared in-process state.
pub struct MemoryGateway {
    backend: Arc<Mutex<Backend>>,
    user: Mutex<Option<User>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// A fresh backend with no session.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            user: Mutex::new(None),
        }
    }

    /// Another client of the same backend, with its own (not yet created) user.
    pub fn peer(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            user: Mutex::new(None),
        }
    }

    /// Number of rows currently stored in `table`.
    #[cfg(test)]
    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .map(|b| b.tables.get(table).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Make every subsequent insert into `table` fail.
    #[cfg(test)]
    pub fn fail_inserts_into(&self, table: &str) {
        if let Ok(mut backend) = self.lock() {
            backend.failing_inserts.insert(table.to_string());
        }
    }

    /// Make calls to `function` fail (or succeed again) from now on.
    #[cfg(test)]
    pub fn fail_rpc(&self, function: &str, failing: bool) {
        if let Ok(mut backend) = self.lock() {
            if failing {
                backend.failing_rpcs.insert(function.to_string());
            } else {
                backend.failing_rpcs.remove(function);
            }
        }
    }

    /// How many times `function` has been called, failed calls included.
    #[cfg(test)]
    pub fn rpc_calls(&self, function: &str) -> usize {
        self.lock()
            .map(|b| b.rpc_calls.get(function).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Backend>, GatewayError> {
        self.backend
            .lock()
            .map_err(|_| GatewayError::Transport("backend state poisoned".to_string()))
    }

    fn require_user(&self) -> Result<User, GatewayError> {
        self.current_user().ok_or(GatewayError::Api {
            status: 401,
            code: Some("PGRST301".to_string()),
            message: "JWT required".to_string(),
        })
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| {
        row.get(&f.column)
            .map(|v| cell_text(v) == f.value)
            .unwrap_or(false)
    })
}

fn project(row: &Row, columns: &str) -> Value {
    let columns = columns.trim();
    if columns == "*" || columns.is_empty() {
        return Value::Object(row.clone());
    }
    let projected: Row = columns
        .split(',')
        .map(str::trim)
        .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.clone())))
        .collect();
    Value::Object(projected)
}

fn conflict(constraint: &str) -> GatewayError {
    GatewayError::Api {
        status: 409,
        code: Some(UNIQUE_VIOLATION.to_string()),
        message: format!("duplicate key value violates unique constraint \"{}\"", constraint),
    }
}

impl Backend {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fill column defaults and enforce unique constraints.
    fn prepare_row(&self, table: &str, mut row: Row) -> Result<Row, GatewayError> {
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));

        match table {
            "lobbies" => {
                let code = row.get("code").cloned().unwrap_or(Value::Null);
                if self.rows(table).iter().any(|r| r.get("code") == Some(&code)) {
                    return Err(conflict("lobbies_code_key"));
                }
            }
            "players" => {
                row.entry("nickname")
                    .or_insert_with(|| Value::String("Player".to_string()));
                row.entry("score").or_insert(json!(0));
                row.entry("joined_at")
                    .or_insert_with(|| Value::String(now_timestamp()));
                let duplicate = self.rows(table).iter().any(|r| {
                    r.get("lobby_id") == row.get("lobby_id") && r.get("user_id") == row.get("user_id")
                });
                if duplicate {
                    return Err(conflict("players_lobby_id_user_id_key"));
                }
            }
            _ => {}
        }
        Ok(row)
    }

    fn find_lobby_by_code(&self, code: &str) -> Value {
        let found: Vec<Value> = self
            .rows("lobbies")
            .iter()
            .filter(|r| r.get("code").and_then(Value::as_str) == Some(code))
            .map(|r| project(r, "id,code"))
            .collect();
        Value::Array(found)
    }

    fn lobby_members(&self, lobby_id: &str) -> Value {
        let mut members: Vec<&Row> = self
            .rows("players")
            .iter()
            .filter(|r| r.get("lobby_id").and_then(Value::as_str) == Some(lobby_id))
            .collect();
        // Timestamps are RFC 3339 with a fixed offset, so they sort lexically
        members.sort_by_key(|r| r.get("joined_at").map(cell_text).unwrap_or_default());
        Value::Array(
            members
                .into_iter()
                .map(|r| project(r, "user_id,nickname,score,joined_at"))
                .collect(),
        )
    }
}

impl Gateway for MemoryGateway {
    fn ensure_session(&self) -> Result<User, GatewayError> {
        let mut user = self
            .user
            .lock()
            .map_err(|_| GatewayError::NoSession)?;
        let user = user.get_or_insert_with(|| User { id: Uuid::new_v4() });
        Ok(user.clone())
    }

    fn current_user(&self) -> Option<User> {
        self.user.lock().ok().and_then(|u| u.clone())
    }

    fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError> {
        self.require_user()?;
        let Value::Object(row) = row else {
            return Err(GatewayError::Api {
                status: 400,
                code: Some("PGRST102".to_string()),
                message: "row must be a JSON object".to_string(),
            });
        };

        let mut backend = self.lock()?;
        if backend.failing_inserts.contains(table) {
            return Err(GatewayError::Transport(format!("insert into {} failed", table)));
        }
        let row = backend.prepare_row(table, row)?;
        backend
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        debug!(table, "memory insert");
        Ok(vec![Value::Object(row)])
    }

    fn select(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>, GatewayError> {
        self.require_user()?;
        let backend = self.lock()?;
        Ok(backend
            .rows(table)
            .iter()
            .filter(|r| matches(r, filters))
            .map(|r| project(r, columns))
            .collect())
    }

    fn update(
        &self,
        table: &str,
        patch: Value,
        filters: &[Filter],
    ) -> Result<Vec<Value>, GatewayError> {
        self.require_user()?;
        let Value::Object(patch) = patch else {
            return Err(GatewayError::Decode("patch must be a JSON object".to_string()));
        };
        let mut backend = self.lock()?;
        let mut updated = Vec::new();
        if let Some(rows) = backend.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(Value::Object(row.clone()));
            }
        }
        Ok(updated)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), GatewayError> {
        self.require_user()?;
        let mut backend = self.lock()?;
        if let Some(rows) = backend.tables.get_mut(table) {
            rows.retain(|r| !matches(r, filters));
        }
        Ok(())
    }

    fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError> {
        self.require_user()?;
        let mut backend = self.lock()?;
        *backend.rpc_calls.entry(function.to_string()).or_default() += 1;
        if backend.failing_rpcs.contains(function) {
            return Err(GatewayError::Transport(format!("rpc {} failed", function)));
        }
        let arg = |name: &str| args.get(name).map(cell_text).unwrap_or_default();
        match function {
            "find_lobby_by_code" => Ok(backend.find_lobby_by_code(&arg("p_code"))),
            "get_lobby_members" => Ok(backend.lobby_members(&arg("p_lobby"))),
            other => Err(GatewayError::Api {
                status: 404,
                code: Some("PGRST202".to_string()),
                message: format!("Could not find the function public.{}", other),
            }),
        }
    }

    fn channel(
        &self,
        topic: &str,
        presence_key: &str,
    ) -> Result<Box<dyn RealtimeChannel>, GatewayError> {
        Ok(Box::new(MemoryChannel {
            backend: Arc::clone(&self.backend),
            topic: topic.to_string(),
            presence_key: presence_key.to_string(),
            phx_ref: Uuid::new_v4().to_string(),
            subscribed: false,
            pending: Vec::new(),
            seen_version: None,
        }))
    }
}

/// Presence channel on the shared in-process hub.
pub struct MemoryChannel {
    backend: Arc<Mutex<Backend>>,
    topic: String,
    presence_key: String,
    phx_ref: String,
    subscribed: bool,
    pending: Vec<ChannelEvent>,
    seen_version: Option<u64>,
}

impl MemoryChannel {
    fn snapshot(topic: &Topic) -> Value {
        let mut state: Map<String, Value> = Map::new();
        for (phx_ref, key, meta) in &topic.metas {
            let mut meta = meta.clone();
            if let Value::Object(fields) = &mut meta {
                fields.insert("phx_ref".to_string(), Value::String(phx_ref.clone()));
            }
            let entry = state
                .entry(key.clone())
                .or_insert_with(|| json!({ "metas": [] }));
            if let Some(Value::Array(metas)) = entry.get_mut("metas") {
                metas.push(meta);
            }
        }
        Value::Object(state)
    }
}

impl RealtimeChannel for MemoryChannel {
    fn subscribe(&mut self) -> Result<(), GatewayError> {
        if !self.subscribed {
            self.subscribed = true;
            self.pending.push(ChannelEvent::Subscribed);
        }
        Ok(())
    }

    fn track(&mut self, payload: Value) -> Result<(), GatewayError> {
        if !self.subscribed {
            return Err(GatewayError::Transport("channel is not subscribed".to_string()));
        }
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| GatewayError::Transport("backend state poisoned".to_string()))?;
        let topic = backend.topics.entry(self.topic.clone()).or_default();
        topic.metas.retain(|(r, _, _)| *r != self.phx_ref);
        topic
            .metas
            .push((self.phx_ref.clone(), self.presence_key.clone(), payload));
        topic.version += 1;
        Ok(())
    }

    fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = std::mem::take(&mut self.pending);
        if !self.subscribed {
            return events;
        }
        if let Ok(backend) = self.backend.lock() {
            if let Some(topic) = backend.topics.get(&self.topic) {
                if self.seen_version != Some(topic.version) {
                    self.seen_version = Some(topic.version);
                    events.push(ChannelEvent::PresenceState(Self::snapshot(topic)));
                }
            }
        }
        events
    }

    fn unsubscribe(&mut self) {
        if !self.subscribed {
            return;
        }
        self.subscribed = false;
        if let Ok(mut backend) = self.backend.lock() {
            if let Some(topic) = backend.topics.get_mut(&self.topic) {
                topic.metas.retain(|(r, _, _)| *r != self.phx_ref);
                topic.version += 1;
            }
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

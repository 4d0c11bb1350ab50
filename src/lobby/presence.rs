//! Presence channel binding for a lobby room
//!
//! Announces the local user on `lobby:<id>` and keeps an approximate roster
//! of who is connected. The polled player table stays the source of truth
//! for membership; presence only marks members as online. Presence failures
//! are logged and otherwise ignored.

use crate::gateway::{ChannelEvent, Gateway, RealtimeChannel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Presence key shared by all clients of a lobby channel
pub const PRESENCE_KEY: &str = "user";

/// Id announced when no session user is known
pub const ANONYMOUS_ID: &str = "anon";

/// Channel name for a lobby.
pub fn lobby_topic(lobby_id: Uuid) -> String {
    format!("lobby:{}", lobby_id)
}

/// What a client announces about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Online entries keyed by their server-assigned `phx_ref`.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    entries: HashMap<String, PresenceEntry>,
}

impl Roster {
    /// Iterate `(phx_ref, entry)` pairs out of a `{key: {metas: [...]}}` map.
    fn metas(state: &Value) -> Vec<(String, PresenceEntry)> {
        let Some(keys) = state.as_object() else {
            return Vec::new();
        };
        keys.values()
            .filter_map(|v| v.get("metas").and_then(Value::as_array))
            .flatten()
            .filter_map(|meta| {
                let phx_ref = meta.get("phx_ref")?.as_str()?.to_string();
                let entry = serde_json::from_value(meta.clone()).ok()?;
                Some((phx_ref, entry))
            })
            .collect()
    }

    /// Replace the roster with a full snapshot.
    pub fn apply_state(&mut self, state: &Value) {
        self.entries = Self::metas(state).into_iter().collect();
    }

    /// Apply an incremental change.
    pub fn apply_diff(&mut self, joins: &Value, leaves: &Value) {
        for (phx_ref, _) in Self::metas(leaves) {
            self.entries.remove(&phx_ref);
        }
        self.entries.extend(Self::metas(joins));
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any client announced `user_id`.
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.values().any(|e| e.id == user_id)
    }

    /// Entries sorted by id, for stable display.
    pub fn entries(&self) -> Vec<&PresenceEntry> {
        let mut entries: Vec<&PresenceEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

/// A bound presence channel. Unbinds on drop.
pub struct PresenceBinding {
    topic: String,
    channel: Option<Box<dyn RealtimeChannel>>,
    me: PresenceEntry,
    subscribed: bool,
    roster: Roster,
}

impl PresenceBinding {
    /// Open and subscribe the channel for `lobby_id`.
    ///
    /// Never fails: if the channel cannot be opened the binding stays inert.
    pub fn bind(gateway: &dyn Gateway, lobby_id: Uuid) -> Self {
        let topic = lobby_topic(lobby_id);
        let id = gateway
            .current_user()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| ANONYMOUS_ID.to_string());

        let channel = match gateway.channel(&topic, PRESENCE_KEY) {
            Ok(mut channel) => match channel.subscribe() {
                Ok(()) => Some(channel),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "presence subscribe failed");
                    None
                }
            },
            Err(e) => {
                warn!(topic = %topic, error = %e, "presence channel unavailable");
                None
            }
        };

        Self {
            topic,
            channel,
            me: PresenceEntry { id, nickname: None },
            subscribed: false,
            roster: Roster::default(),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Currently online clients.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// What this client announces.
    pub fn me(&self) -> &PresenceEntry {
        &self.me
    }

    fn track(&mut self) {
        let Some(channel) = &mut self.channel else {
            return;
        };
        let payload = match serde_json::to_value(&self.me) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode presence payload");
                return;
            }
        };
        if let Err(e) = channel.track(payload) {
            warn!(topic = %self.topic, error = %e, "presence track failed");
        }
    }

    /// Process channel events. Returns true when the roster changed.
    pub fn poll(&mut self) -> bool {
        let events = match &mut self.channel {
            Some(channel) => channel.poll(),
            None => return false,
        };

        let mut changed = false;
        for event in events {
            match event {
                ChannelEvent::Subscribed => {
                    debug!(topic = %self.topic, "presence subscribed");
                    self.subscribed = true;
                    self.track();
                }
                ChannelEvent::PresenceState(state) => {
                    self.roster.apply_state(&state);
                    changed = true;
                }
                ChannelEvent::PresenceDiff { joins, leaves } => {
                    self.roster.apply_diff(&joins, &leaves);
                    changed = true;
                }
                ChannelEvent::Closed(reason) => {
                    warn!(topic = %self.topic, reason = %reason, "presence channel closed");
                    self.subscribed = false;
                    self.channel = None;
                    break;
                }
            }
        }
        changed
    }

    /// Attach the nickname to this client's presence.
    ///
    /// Re-announces immediately when subscribed, otherwise on subscription.
    pub fn set_nickname(&mut self, nickname: &str) {
        self.me.nickname = Some(nickname.to_string());
        if self.subscribed {
            self.track();
        }
    }

    /// Leave the channel. Safe to call more than once.
    pub fn unbind(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.unsubscribe();
            debug!(topic = %self.topic, "presence unbound");
        }
        self.subscribed = false;
    }
}

impl Drop for PresenceBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}

//! Realtime channels over the Phoenix websocket protocol
//!
//! Wire format (vsn 1.0.0), one JSON object per text frame:
//! `{"topic": "...", "event": "...", "payload": {...}, "ref": "1", "join_ref": "1"}`
//!
//! A [`SocketChannel`] owns one websocket on a background thread. The UI
//! thread talks to it through an mpsc command channel and drains
//! [`ChannelEvent`]s with [`RealtimeChannel::poll`].

use super::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::TcpStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// Interval between protocol heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Socket read timeout, bounds how long commands wait to be sent.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

const JOIN_REF: &str = "1";

/// Events surfaced by a realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server accepted the join
    Subscribed,
    /// Full presence snapshot: `{key: {metas: [...]}}`
    PresenceState(Value),
    /// Incremental presence change
    PresenceDiff { joins: Value, leaves: Value },
    /// The channel is gone (join refused, socket closed or failed)
    Closed(String),
}

/// A realtime channel handle.
pub trait RealtimeChannel: Send {
    /// Start joining. Completion is reported as [`ChannelEvent::Subscribed`].
    fn subscribe(&mut self) -> Result<(), GatewayError>;

    /// Announce (or replace) this client's presence payload.
    fn track(&mut self, payload: Value) -> Result<(), GatewayError>;

    /// Drain pending events without blocking.
    fn poll(&mut self) -> Vec<ChannelEvent>;

    /// Leave the channel and release the socket. Idempotent.
    fn unsubscribe(&mut self);
}

/// A Phoenix protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }

    /// `phx_join` carrying the presence key and access token.
    pub fn join(topic: &str, presence_key: &str, access_token: Option<&str>) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": presence_key },
                "postgres_changes": [],
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self::new(topic, "phx_join", payload, 1)
    }

    /// Presence `track` for this client.
    pub fn track(topic: &str, meta: Value, msg_ref: u64) -> Self {
        let payload = json!({ "type": "presence", "event": "track", "payload": meta });
        Self::new(topic, "presence", payload, msg_ref)
    }

    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self::new(topic, "phx_leave", json!({}), msg_ref)
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }
}

/// Map a server frame for `topic` to a channel event.
pub fn translate(message: &PhoenixMessage, topic: &str) -> Option<ChannelEvent> {
    if message.topic != topic {
        return None;
    }
    match message.event.as_str() {
        "phx_reply" if message.msg_ref.as_deref() == Some(JOIN_REF) => {
            match message.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Some(ChannelEvent::Subscribed),
                _ => Some(ChannelEvent::Closed(format!(
                    "join refused: {}",
                    message.payload.get("response").unwrap_or(&Value::Null)
                ))),
            }
        }
        "presence_state" => Some(ChannelEvent::PresenceState(message.payload.clone())),
        "presence_diff" => Some(ChannelEvent::PresenceDiff {
            joins: message.payload.get("joins").cloned().unwrap_or(Value::Null),
            leaves: message.payload.get("leaves").cloned().unwrap_or(Value::Null),
        }),
        "phx_error" => Some(ChannelEvent::Closed("channel error".to_string())),
        "phx_close" => Some(ChannelEvent::Closed("channel closed".to_string())),
        _ => None,
    }
}

enum Command {
    Track(Value),
    Leave,
}

/// Websocket-backed channel.
pub struct SocketChannel {
    url: String,
    topic: String,
    presence_key: String,
    access_token: Option<String>,
    commands: Option<mpsc::Sender<Command>>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
}

impl SocketChannel {
    /// `url` is the full websocket endpoint, `name` the channel name
    /// (e.g. `lobby:<id>`); the wire topic is `realtime:<name>`.
    pub fn new(url: String, name: &str, presence_key: &str, access_token: Option<String>) -> Self {
        Self {
            url,
            topic: format!("realtime:{}", name),
            presence_key: presence_key.to_string(),
            access_token,
            commands: None,
            events: None,
        }
    }
}

impl RealtimeChannel for SocketChannel {
    fn subscribe(&mut self) -> Result<(), GatewayError> {
        if self.commands.is_some() {
            return Ok(());
        }
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (evt_tx, evt_rx) = mpsc::channel();
        let url = self.url.clone();
        let topic = self.topic.clone();
        let join = PhoenixMessage::join(&self.topic, &self.presence_key, self.access_token.as_deref());

        thread::Builder::new()
            .name(format!("realtime {}", self.topic))
            .spawn(move || {
                if let Err(reason) = run_socket(&url, &topic, join, cmd_rx, &evt_tx) {
                    let _ = evt_tx.send(ChannelEvent::Closed(reason));
                }
            })
            .map_err(|e| GatewayError::Transport(format!("failed to spawn realtime thread: {}", e)))?;

        self.commands = Some(cmd_tx);
        self.events = Some(evt_rx);
        Ok(())
    }

    fn track(&mut self, payload: Value) -> Result<(), GatewayError> {
        let commands = self.commands.as_ref().ok_or(GatewayError::Transport(
            "channel is not subscribed".to_string(),
        ))?;
        commands
            .send(Command::Track(payload))
            .map_err(|_| GatewayError::Transport("realtime socket is closed".to_string()))
    }

    fn poll(&mut self) -> Vec<ChannelEvent> {
        match &self.events {
            Some(events) => events.try_iter().collect(),
            None => Vec::new(),
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Leave);
        }
        self.events = None;
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn set_read_timeout(socket: &mut Socket, timeout: Duration) -> std::io::Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(stream) => stream.get_mut().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

fn send(socket: &mut Socket, message: &PhoenixMessage) -> Result<(), String> {
    let text = serde_json::to_string(message).map_err(|e| e.to_string())?;
    socket
        .send(Message::Text(text.into()))
        .map_err(|e| format!("send failed: {}", e))
}

/// Socket loop. Returns `Err(reason)` when the channel dies, `Ok` on leave.
fn run_socket(
    url: &str,
    topic: &str,
    join: PhoenixMessage,
    commands: mpsc::Receiver<Command>,
    events: &mpsc::Sender<ChannelEvent>,
) -> Result<(), String> {
    let (mut socket, _) = tungstenite::connect(url).map_err(|e| format!("connect failed: {}", e))?;
    set_read_timeout(&mut socket, READ_TIMEOUT).map_err(|e| e.to_string())?;
    info!(topic, "realtime socket connected");

    send(&mut socket, &join)?;
    let mut next_ref: u64 = 2;
    let mut last_heartbeat = Instant::now();

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Track(meta)) => {
                    send(&mut socket, &PhoenixMessage::track(topic, meta, next_ref))?;
                    next_ref += 1;
                }
                Ok(Command::Leave) | Err(mpsc::TryRecvError::Disconnected) => {
                    let _ = send(&mut socket, &PhoenixMessage::leave(topic, next_ref));
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    info!(topic, "realtime channel left");
                    return Ok(());
                }
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            send(&mut socket, &PhoenixMessage::heartbeat(next_ref))?;
            next_ref += 1;
            last_heartbeat = Instant::now();
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                let message: PhoenixMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed realtime frame");
                        continue;
                    }
                };
                if let Some(event) = translate(&message, topic) {
                    let closed = matches!(event, ChannelEvent::Closed(_));
                    if events.send(event).is_err() || closed {
                        return Ok(());
                    }
                }
            }
            Ok(Message::Close(_)) => return Err("socket closed by server".to_string()),
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                warn!(topic, error = %e, "realtime socket failed");
                return Err(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:lobby:abc";

    fn frame(event: &str, payload: Value, msg_ref: Option<&str>) -> PhoenixMessage {
        PhoenixMessage {
            topic: TOPIC.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: msg_ref.map(str::to_string),
            join_ref: None,
        }
    }

    #[test]
    fn test_join_message_shape() {
        let join = PhoenixMessage::join(TOPIC, "user", Some("tok"));
        let value = serde_json::to_value(&join).unwrap();
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["payload"]["config"]["presence"]["key"], "user");
        assert_eq!(value["payload"]["access_token"], "tok");
    }

    #[test]
    fn test_track_message_wraps_payload() {
        let track = PhoenixMessage::track(TOPIC, json!({"id": "u1"}), 7);
        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["event"], "presence");
        assert_eq!(value["payload"]["event"], "track");
        assert_eq!(value["payload"]["payload"]["id"], "u1");
        assert_eq!(value["ref"], "7");
    }

    #[test]
    fn test_heartbeat_has_no_join_ref() {
        let value = serde_json::to_value(PhoenixMessage::heartbeat(3)).unwrap();
        assert_eq!(value["topic"], "phoenix");
        assert!(value.get("join_ref").is_none());
    }

    #[test]
    fn test_translate_join_reply() {
        let ok = frame("phx_reply", json!({"status": "ok", "response": {}}), Some("1"));
        assert_eq!(translate(&ok, TOPIC), Some(ChannelEvent::Subscribed));

        let refused = frame("phx_reply", json!({"status": "error"}), Some("1"));
        assert!(matches!(translate(&refused, TOPIC), Some(ChannelEvent::Closed(_))));

        // Replies to later pushes are not join replies
        let track_ack = frame("phx_reply", json!({"status": "ok"}), Some("5"));
        assert_eq!(translate(&track_ack, TOPIC), None);
    }

    #[test]
    fn test_translate_presence() {
        let state = frame("presence_state", json!({"user": {"metas": []}}), None);
        assert!(matches!(translate(&state, TOPIC), Some(ChannelEvent::PresenceState(_))));

        let diff = frame("presence_diff", json!({"joins": {}, "leaves": {}}), None);
        assert_eq!(
            translate(&diff, TOPIC),
            Some(ChannelEvent::PresenceDiff { joins: json!({}), leaves: json!({}) })
        );
    }

    #[test]
    fn test_translate_ignores_other_topics() {
        let mut other = frame("presence_state", json!({}), None);
        other.topic = "realtime:lobby:other".to_string();
        assert_eq!(translate(&other, TOPIC), None);
    }

    #[test]
    fn test_frame_parses_server_json() {
        let raw = r#"{"topic":"realtime:lobby:abc","event":"phx_close","payload":{},"ref":null}"#;
        let message: PhoenixMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(translate(&message, TOPIC), Some(ChannelEvent::Closed(_))));
    }

    #[test]
    fn test_track_before_subscribe_fails() {
        let mut channel = SocketChannel::new("ws://127.0.0.1:9".into(), "lobby:abc", "user", None);
        assert!(channel.track(json!({})).is_err());
        assert!(channel.poll().is_empty());
    }
}

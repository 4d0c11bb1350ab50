//! Lobby formation on top of the remote data gateway
//!
//! Handles:
//! - Join code generation
//! - Creating a lobby (host becomes the first player)
//! - Joining a lobby by code (idempotent)
//! - Reading the member list and the caller's own player record
//! - Membership polling ([`members`]) and realtime presence ([`presence`])

pub mod members;
pub mod presence;

use crate::gateway::{Filter, Gateway, GatewayError};
use crate::validation::{validate_join_code, validate_nickname, ValidationError};
use chrono::{DateTime, Utc};
use rand::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Join code alphabet: no 0/O or 1/I
pub const CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Join code length
pub const CODE_LENGTH: usize = 6;

/// Minimum number of players to start a game
pub const MIN_PLAYERS: usize = 2;

/// Nickname the backend assigns to new player rows
pub const DEFAULT_NICKNAME: &str = "Player";

const LOBBIES: &str = "lobbies";
const PLAYERS: &str = "players";

/// A joinable pre-game room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: Uuid,
    pub code: String,
    /// Absent in `find_lobby_by_code` results
    #[serde(default)]
    pub host_id: Option<Uuid>,
}

/// A user's membership record in one lobby
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub lobby_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub score: i64,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    /// Whether the player still carries the placeholder (or no) nickname.
    pub fn needs_nickname(&self) -> bool {
        match self.nickname.as_deref() {
            None => true,
            Some(name) => name.is_empty() || name == DEFAULT_NICKNAME,
        }
    }
}

/// One row of `get_lobby_members`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: Uuid,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub score: i64,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// Nickname, or the first 6 characters of the user id.
    pub fn display_name(&self) -> String {
        match self.nickname.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.user_id.to_string().chars().take(6).collect(),
        }
    }
}

/// Errors from lobby operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /// No auth session
    NotAuthenticated,
    /// No open lobby has this code
    InvalidCode,
    /// Form value rejected before reaching the backend
    Validation(ValidationError),
    /// Any other backend failure
    Backend(GatewayError),
}

impl std::fmt::Display for LobbyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LobbyError::NotAuthenticated => write!(f, "not signed in"),
            LobbyError::InvalidCode => write!(f, "invalid or closed code"),
            LobbyError::Validation(e) => write!(f, "{}", e),
            LobbyError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LobbyError {}

impl From<GatewayError> for LobbyError {
    fn from(e: GatewayError) -> Self {
        LobbyError::Backend(e)
    }
}

impl From<ValidationError> for LobbyError {
    fn from(e: ValidationError) -> Self {
        LobbyError::Validation(e)
    }
}

/// Generate a random join code.
pub fn generate_code() -> String {
    generate_code_with_rng(&mut rand::rng())
}

/// Generate a join code using a specific RNG (for testing/seeding).
pub fn generate_code_with_rng<R: Rng>(rng: &mut R) -> String {
    let alphabet: Vec<char> = CODE_ALPHABET.chars().collect();
    (0..CODE_LENGTH)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())])
        .collect()
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, LobbyError> {
    serde_json::from_value(value).map_err(|e| LobbyError::Backend(GatewayError::from(e)))
}

fn first_row<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, LobbyError> {
    rows.into_iter().next().map(decode).transpose()
}

/// The lobby API: all lobby reads and writes go through here.
#[derive(Clone)]
pub struct LobbyApi {
    gateway: Arc<dyn Gateway>,
}

impl LobbyApi {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// The gateway this API talks through.
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    fn user_id(&self) -> Result<Uuid, LobbyError> {
        self.gateway
            .current_user()
            .map(|u| u.id)
            .ok_or(LobbyError::NotAuthenticated)
    }

    /// Create a lobby hosted by the caller, who also joins it as a player.
    ///
    /// The two writes are not transactional. If the player insert fails the
    /// new lobby is deleted again before the error is returned.
    pub fn create_lobby(&self) -> Result<Lobby, LobbyError> {
        let user_id = self.user_id()?;
        let code = generate_code();

        let rows = self
            .gateway
            .insert(LOBBIES, json!({ "code": code, "host_id": user_id }))?;
        let lobby: Lobby = first_row(rows)?.ok_or_else(|| {
            LobbyError::Backend(GatewayError::Decode("insert returned no lobby".to_string()))
        })?;

        let joined = self
            .gateway
            .insert(PLAYERS, json!({ "lobby_id": lobby.id, "user_id": user_id }));
        if let Err(e) = joined {
            warn!(lobby = %lobby.id, error = %e, "host join failed, removing lobby");
            if let Err(cleanup) = self.gateway.delete(LOBBIES, &[Filter::eq("id", lobby.id)]) {
                warn!(lobby = %lobby.id, error = %cleanup, "failed to remove orphaned lobby");
            }
            return Err(e.into());
        }

        info!(lobby = %lobby.id, code = %lobby.code, "created lobby");
        Ok(lobby)
    }

    /// Join the lobby with `code`. Joining a lobby twice is not an error.
    pub fn join_lobby_by_code(&self, code: &str) -> Result<Lobby, LobbyError> {
        let code = validate_join_code(code)?;

        let found = match self.gateway.rpc("find_lobby_by_code", json!({ "p_code": code })) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "lobby lookup failed");
                return Err(LobbyError::InvalidCode);
            }
        };
        let lobbies: Vec<Lobby> = match found {
            Value::Null => Vec::new(),
            other => decode(other)?,
        };
        let lobby = lobbies.into_iter().next().ok_or(LobbyError::InvalidCode)?;

        let user_id = self.user_id()?;
        match self
            .gateway
            .insert(PLAYERS, json!({ "lobby_id": lobby.id, "user_id": user_id }))
        {
            Ok(_) => info!(lobby = %lobby.id, "joined lobby"),
            Err(e) if e.is_unique_violation() => info!(lobby = %lobby.id, "already a member"),
            Err(e) => return Err(e.into()),
        }
        Ok(lobby)
    }

    /// All players of a lobby, oldest first.
    pub fn fetch_lobby_members(&self, lobby_id: Uuid) -> Result<Vec<Member>, LobbyError> {
        let rows = self
            .gateway
            .rpc("get_lobby_members", json!({ "p_lobby": lobby_id }))?;
        match rows {
            Value::Null => Ok(Vec::new()),
            other => decode(other),
        }
    }

    /// Lobby metadata (code and host) by id.
    pub fn get_lobby(&self, lobby_id: Uuid) -> Result<Option<Lobby>, LobbyError> {
        let rows = self
            .gateway
            .select(LOBBIES, "id,code,host_id", &[Filter::eq("id", lobby_id)])?;
        first_row(rows)
    }

    /// The caller's own player record in a lobby.
    pub fn get_my_player(&self, lobby_id: Uuid) -> Result<Option<Player>, LobbyError> {
        let user_id = self.user_id()?;
        let rows = self.gateway.select(
            PLAYERS,
            "id,lobby_id,user_id,nickname,score,joined_at",
            &[Filter::eq("lobby_id", lobby_id), Filter::eq("user_id", user_id)],
        )?;
        first_row(rows)
    }

    /// Validate and store the caller's nickname. Returns the stored value.
    pub fn set_my_nickname(&self, lobby_id: Uuid, nickname: &str) -> Result<String, LobbyError> {
        let nickname = validate_nickname(nickname)?;
        let user_id = self.user_id()?;
        self.gateway.update(
            PLAYERS,
            json!({ "nickname": nickname }),
            &[Filter::eq("lobby_id", lobby_id), Filter::eq("user_id", user_id)],
        )?;
        info!(lobby = %lobby_id, "nickname saved");
        Ok(nickname)
    }
}

/// State of the room's start button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartButton {
    pub enabled: bool,
    pub label: &'static str,
}

/// Start is only available to the host once enough players are in.
pub fn start_button(is_host: bool, member_count: usize) -> StartButton {
    let can_start = is_host && member_count >= MIN_PLAYERS;
    let label = match (is_host, can_start) {
        (false, _) => "Waiting for host",
        (true, true) => "Start",
        (true, false) => "Waiting…",
    };
    StartButton {
        enabled: can_start,
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGateway, RealtimeChannel, User};
    use crate::validation::is_generated_code;
    use rand::rngs::StdRng;

    fn signed_in() -> (Arc<MemoryGateway>, LobbyApi) {
        let gw = Arc::new(MemoryGateway::new());
        gw.ensure_session().unwrap();
        let api = LobbyApi::new(gw.clone());
        (gw, api)
    }

    #[test]
    fn test_generated_codes_use_alphabet() {
        for _ in 0..500 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| CODE_ALPHABET.contains(c)), "bad code {}", code);
        }
    }

    #[test]
    fn test_seeded_codes_are_reproducible() {
        let a = generate_code_with_rng(&mut StdRng::seed_from_u64(7));
        let b = generate_code_with_rng(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(is_generated_code(&a));
    }

    #[test]
    fn test_alphabet_excludes_confusable_characters() {
        for c in ['0', 'O', '1', 'I'] {
            assert!(!CODE_ALPHABET.contains(c));
        }
        assert_eq!(CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn test_create_lobby_requires_session() {
        let api = LobbyApi::new(Arc::new(MemoryGateway::new()));
        assert_eq!(api.create_lobby(), Err(LobbyError::NotAuthenticated));
    }

    #[test]
    fn test_create_lobby_adds_host_as_player() {
        let (gw, api) = signed_in();
        let me = gw.current_user().unwrap().id;
        let lobby = api.create_lobby().unwrap();

        assert!(is_generated_code(&lobby.code));
        assert_eq!(lobby.host_id, Some(me));

        let members = api.fetch_lobby_members(lobby.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, me);
        assert_eq!(members[0].nickname.as_deref(), Some(DEFAULT_NICKNAME));
        assert_eq!(members[0].score, 0);
    }

    #[test]
    fn test_create_lobby_compensates_failed_host_join() {
        let (gw, api) = signed_in();
        gw.fail_inserts_into("players");
        assert!(matches!(api.create_lobby(), Err(LobbyError::Backend(_))));
        assert_eq!(gw.row_count("lobbies"), 0);
    }

    #[test]
    fn test_join_unknown_code_is_invalid() {
        let (_gw, api) = signed_in();
        assert_eq!(api.join_lobby_by_code("ZZZZZZ"), Err(LobbyError::InvalidCode));
        assert!(matches!(
            api.join_lobby_by_code("abc"),
            Err(LobbyError::Validation(ValidationError::CodeLength { .. }))
        ));
    }

    #[test]
    fn test_join_is_idempotent() {
        let (gw, host) = signed_in();
        let lobby = host.create_lobby().unwrap();

        let guest_gw = Arc::new(gw.peer());
        guest_gw.ensure_session().unwrap();
        let guest = LobbyApi::new(guest_gw.clone());

        let first = guest.join_lobby_by_code(&lobby.code.to_lowercase()).unwrap();
        let second = guest.join_lobby_by_code(&lobby.code).unwrap();
        assert_eq!(first.id, lobby.id);
        assert_eq!(second.id, lobby.id);

        let members = host.fetch_lobby_members(lobby.id).unwrap();
        let guest_id = guest_gw.current_user().unwrap().id;
        assert_eq!(members.len(), 2);
        assert_eq!(members.iter().filter(|m| m.user_id == guest_id).count(), 1);
    }

    #[test]
    fn test_join_requires_session() {
        let (gw, host) = signed_in();
        let lobby = host.create_lobby().unwrap();
        let anonymous = LobbyApi::new(Arc::new(gw.peer()));
        // The lookup itself is refused without a session
        assert_eq!(
            anonymous.join_lobby_by_code(&lobby.code),
            Err(LobbyError::InvalidCode)
        );
    }

    /// A client whose lookups succeed but which has no user of its own.
    struct SignedOut(MemoryGateway);

    impl Gateway for SignedOut {
        fn ensure_session(&self) -> Result<User, GatewayError> {
            Err(GatewayError::NoSession)
        }
        fn current_user(&self) -> Option<User> {
            None
        }
        fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError> {
            self.0.insert(table, row)
        }
        fn select(
            &self,
            table: &str,
            columns: &str,
            filters: &[Filter],
        ) -> Result<Vec<Value>, GatewayError> {
            self.0.select(table, columns, filters)
        }
        fn update(
            &self,
            table: &str,
            patch: Value,
            filters: &[Filter],
        ) -> Result<Vec<Value>, GatewayError> {
            self.0.update(table, patch, filters)
        }
        fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), GatewayError> {
            self.0.delete(table, filters)
        }
        fn rpc(&self, function: &str, args: Value) -> Result<Value, GatewayError> {
            self.0.rpc(function, args)
        }
        fn channel(
            &self,
            topic: &str,
            presence_key: &str,
        ) -> Result<Box<dyn RealtimeChannel>, GatewayError> {
            self.0.channel(topic, presence_key)
        }
    }

    #[test]
    fn test_join_found_lobby_without_user_is_not_authenticated() {
        let (gw, host) = signed_in();
        let lobby = host.create_lobby().unwrap();

        let lookup = gw.peer();
        lookup.ensure_session().unwrap();
        let api = LobbyApi::new(Arc::new(SignedOut(lookup)));

        assert_eq!(api.join_lobby_by_code(&lobby.code), Err(LobbyError::NotAuthenticated));
        assert_eq!(host.fetch_lobby_members(lobby.id).unwrap().len(), 1);
    }

    #[test]
    fn test_get_lobby_metadata() {
        let (gw, api) = signed_in();
        let lobby = api.create_lobby().unwrap();
        let fetched = api.get_lobby(lobby.id).unwrap().unwrap();
        assert_eq!(fetched.code, lobby.code);
        assert_eq!(fetched.host_id, gw.current_user().map(|u| u.id));
        assert!(api.get_lobby(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_my_player_and_nickname() {
        let (_gw, api) = signed_in();
        let lobby = api.create_lobby().unwrap();

        let me = api.get_my_player(lobby.id).unwrap().unwrap();
        assert!(me.needs_nickname());
        assert_eq!(me.lobby_id, lobby.id);

        assert_eq!(api.set_my_nickname(lobby.id, "  Quizzer "), Ok("Quizzer".to_string()));
        let me = api.get_my_player(lobby.id).unwrap().unwrap();
        assert_eq!(me.nickname.as_deref(), Some("Quizzer"));
        assert!(!me.needs_nickname());
    }

    #[test]
    fn test_set_nickname_validates_first() {
        let (_gw, api) = signed_in();
        let lobby = api.create_lobby().unwrap();
        assert_eq!(
            api.set_my_nickname(lobby.id, "bad!name"),
            Err(LobbyError::Validation(ValidationError::NicknameInvalidChars))
        );
    }

    #[test]
    fn test_get_my_player_outside_lobby() {
        let (_gw, api) = signed_in();
        assert_eq!(api.get_my_player(Uuid::new_v4()), Ok(None));
    }

    #[test]
    fn test_member_display_name() {
        let id = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let mut member = Member {
            user_id: id,
            nickname: None,
            score: 0,
            joined_at: Utc::now(),
        };
        assert_eq!(member.display_name(), "a1b2c3");
        member.nickname = Some("Ada".into());
        assert_eq!(member.display_name(), "Ada");
    }

    #[test]
    fn test_start_button() {
        assert_eq!(start_button(true, 1), StartButton { enabled: false, label: "Waiting…" });
        assert_eq!(start_button(true, 2), StartButton { enabled: true, label: "Start" });
        for count in 0..5 {
            assert_eq!(
                start_button(false, count),
                StartButton { enabled: false, label: "Waiting for host" }
            );
        }
    }

    #[test]
    fn test_member_rows_decode_from_backend_json() {
        let member: Member = serde_json::from_value(json!({
            "user_id": "6f1c1bd4-2f0a-4a40-9b77-4b1f5d8f0c11",
            "nickname": null,
            "score": 3,
            "joined_at": "2025-03-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(member.score, 3);
        assert!(member.nickname.is_none());
    }
}

//! Room screen state
//!
//! On mount three things start side by side:
//! - lobby metadata and host status
//! - the presence channel
//! - the nickname check, which opens the nickname modal when needed
//!
//! The member list is polled for as long as the screen lives.

use crate::gateway::User;
use crate::lobby::members::MembersQuery;
use crate::lobby::presence::PresenceBinding;
use crate::lobby::{start_button, Lobby, LobbyApi, LobbyError, Member, Player, StartButton};
use crate::tasks::{CancelToken, Task, TaskPoll};
use crate::validation::{validate_nickname, MAX_NICKNAME_LENGTH};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Shown when saving the nickname fails on the backend
pub const SAVE_FAILED: &str = "Could not save name";

type MetaResult = (Option<User>, Result<Option<Lobby>, LobbyError>);

/// The "choose a nickname" modal
#[derive(Default)]
pub struct NicknameModal {
    pub input: String,
    pub error: Option<String>,
    saving: Option<Task<Result<String, LobbyError>>>,
}

impl NicknameModal {
    pub fn is_saving(&self) -> bool {
        self.saving.is_some()
    }
}

/// A mounted lobby room
pub struct RoomScreen {
    pub lobby_id: Uuid,
    /// Known from navigation or filled in by the metadata fetch
    pub code: Option<String>,
    pub is_host: bool,
    pub modal: Option<NicknameModal>,
    api: LobbyApi,
    members: MembersQuery,
    presence: PresenceBinding,
    meta: Option<Task<MetaResult>>,
    nickname_check: Option<Task<Result<Option<Player>, LobbyError>>>,
    cancel: CancelToken,
}

impl RoomScreen {
    /// Mount the room for `lobby_id`.
    pub fn mount(api: LobbyApi, lobby_id: Uuid, code: Option<String>) -> Self {
        let cancel = CancelToken::new();

        let meta = {
            let api = api.clone();
            Task::spawn(&cancel, move || {
                let user = api.gateway().current_user();
                (user, api.get_lobby(lobby_id))
            })
        };
        let nickname_check = {
            let api = api.clone();
            Task::spawn(&cancel, move || api.get_my_player(lobby_id))
        };
        let presence = PresenceBinding::bind(api.gateway().as_ref(), lobby_id);
        let members = MembersQuery::new(api.clone(), Some(lobby_id));

        info!(lobby = %lobby_id, "entered room");
        Self {
            lobby_id,
            code,
            is_host: false,
            modal: None,
            api,
            members,
            presence,
            meta: Some(meta),
            nickname_check: Some(nickname_check),
            cancel,
        }
    }

    /// Advance background work. Call on every tick of the event loop.
    pub fn poll(&mut self, now: Instant) {
        self.poll_meta();
        self.poll_nickname_check();
        self.poll_save();
        self.members.poll(now);
        self.presence.poll();
    }

    fn poll_meta(&mut self) {
        let Some(task) = &mut self.meta else { return };
        match task.poll() {
            TaskPoll::Pending => {}
            TaskPoll::Ready((user, Ok(Some(lobby)))) => {
                if self.code.is_none() {
                    self.code = Some(lobby.code.clone());
                }
                self.is_host = match (user, lobby.host_id) {
                    (Some(user), Some(host)) => user.id == host,
                    _ => false,
                };
                self.meta = None;
            }
            TaskPoll::Ready((_, result)) => {
                debug!(lobby = %self.lobby_id, result = ?result.err(), "lobby metadata unavailable");
                self.meta = None;
            }
            TaskPoll::Gone => self.meta = None,
        }
    }

    fn poll_nickname_check(&mut self) {
        let Some(task) = &mut self.nickname_check else { return };
        match task.poll() {
            TaskPoll::Pending => return,
            TaskPoll::Ready(Ok(Some(player))) => {
                if player.needs_nickname() {
                    self.modal = Some(NicknameModal::default());
                } else if let Some(nickname) = &player.nickname {
                    self.presence.set_nickname(nickname);
                }
            }
            // A missing row or failed lookup means no prompt
            TaskPoll::Ready(Ok(None)) => {}
            TaskPoll::Ready(Err(e)) => debug!(error = %e, "nickname check failed"),
            TaskPoll::Gone => {}
        }
        self.nickname_check = None;
    }

    fn poll_save(&mut self) {
        let Some(modal) = &mut self.modal else { return };
        let Some(task) = &mut modal.saving else { return };
        match task.poll() {
            TaskPoll::Pending => {}
            TaskPoll::Ready(Ok(nickname)) => {
                self.modal = None;
                self.presence.set_nickname(&nickname);
                self.members.refetch();
            }
            TaskPoll::Ready(Err(e)) => {
                debug!(error = %e, "saving nickname failed");
                modal.error = Some(SAVE_FAILED.to_string());
                modal.saving = None;
            }
            TaskPoll::Gone => modal.saving = None,
        }
    }

    /// Latest polled member list.
    pub fn members(&self) -> &[Member] {
        self.members.members()
    }

    /// Whether the latest member refresh failed (the list shown is older).
    pub fn members_stale(&self) -> bool {
        self.members.last_error().is_some()
    }

    /// Whether a member currently has a live presence on the channel.
    pub fn is_online(&self, member: &Member) -> bool {
        self.presence.roster().contains(&member.user_id.to_string())
    }

    /// Whether `member` is the local user.
    pub fn is_me(&self, member: &Member) -> bool {
        self.api
            .gateway()
            .current_user()
            .is_some_and(|u| u.id == member.user_id)
    }

    pub fn start_button(&self) -> StartButton {
        start_button(self.is_host, self.members().len())
    }

    /// Press "Start". No game exists yet, so this only reports availability.
    pub fn request_start(&self) -> bool {
        let button = self.start_button();
        if button.enabled {
            info!(lobby = %self.lobby_id, "start requested, game start is not available yet");
        }
        button.enabled
    }

    /// Text to share with friends.
    pub fn invite_message(&self) -> Option<String> {
        self.code
            .as_ref()
            .map(|code| format!("Join my Quiz Rush lobby: {}", code))
    }

    /// Open the nickname modal manually.
    pub fn open_nickname(&mut self) {
        if self.modal.is_none() {
            self.modal = Some(NicknameModal::default());
        }
    }

    pub fn nickname_char(&mut self, c: char) {
        if let Some(modal) = &mut self.modal {
            if modal.input.chars().count() < MAX_NICKNAME_LENGTH {
                modal.input.push(c);
            }
            modal.error = None;
        }
    }

    pub fn nickname_backspace(&mut self) {
        if let Some(modal) = &mut self.modal {
            modal.input.pop();
            modal.error = None;
        }
    }

    /// Validate locally, then save in the background.
    pub fn save_nickname(&mut self) {
        let Some(modal) = &mut self.modal else { return };
        if modal.is_saving() {
            return;
        }
        if let Err(e) = validate_nickname(&modal.input) {
            modal.error = Some(e.message().to_string());
            return;
        }
        let api = self.api.clone();
        let lobby_id = self.lobby_id;
        let input = modal.input.clone();
        modal.error = None;
        modal.saving = Some(Task::spawn(&self.cancel, move || {
            api.set_my_nickname(lobby_id, &input)
        }));
    }

    /// Close the modal without saving.
    pub fn skip_nickname(&mut self) {
        self.modal = None;
    }

    /// Presence binding (for display of the online roster).
    pub fn presence(&self) -> &PresenceBinding {
        &self.presence
    }

    /// Release the channel and stop all background work.
    pub fn leave(&mut self) {
        self.cancel.cancel();
        self.members.cancel();
        self.presence.unbind();
        info!(lobby = %self.lobby_id, "left room");
    }
}

impl Drop for RoomScreen {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, MemoryGateway};
    use crate::lobby::members::REFETCH_INTERVAL;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn host() -> (Arc<MemoryGateway>, LobbyApi) {
        let gw = Arc::new(MemoryGateway::new());
        gw.ensure_session().unwrap();
        (gw.clone(), LobbyApi::new(gw))
    }

    fn poll_until(room: &mut RoomScreen, now: Instant, done: impl Fn(&RoomScreen) -> bool) {
        for _ in 0..200 {
            room.poll(now);
            if done(room) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("room never reached the expected state");
    }

    #[test]
    fn test_host_sees_code_and_self() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let mut room = RoomScreen::mount(api, lobby.id, None);

        poll_until(&mut room, Instant::now(), |r| r.is_host && r.members().len() == 1);
        assert_eq!(room.code.as_deref(), Some(lobby.code.as_str()));
        assert!(room.is_me(&room.members()[0]));
        assert_eq!(room.start_button().label, "Waiting…");
        assert!(!room.request_start());
        assert_eq!(
            room.invite_message(),
            Some(format!("Join my Quiz Rush lobby: {}", lobby.code))
        );
    }

    #[test]
    fn test_default_nickname_opens_modal() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let mut room = RoomScreen::mount(api, lobby.id, Some(lobby.code));
        poll_until(&mut room, Instant::now(), |r| r.modal.is_some());
    }

    #[test]
    fn test_existing_nickname_skips_modal_and_is_announced() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        api.set_my_nickname(lobby.id, "Ada").unwrap();

        let mut room = RoomScreen::mount(api, lobby.id, None);
        poll_until(&mut room, Instant::now(), |r| r.nickname_check.is_none());
        assert!(room.modal.is_none());
        assert_eq!(room.presence().me().nickname.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_nickname_modal_validation_and_save() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let mut room = RoomScreen::mount(api.clone(), lobby.id, None);
        poll_until(&mut room, Instant::now(), |r| r.modal.is_some());

        for c in "ab".chars() {
            room.nickname_char(c);
        }
        room.save_nickname();
        assert_eq!(
            room.modal.as_ref().and_then(|m| m.error.as_deref()),
            Some("At least 3 characters")
        );

        room.nickname_char('c');
        assert!(room.modal.as_ref().unwrap().error.is_none());
        room.save_nickname();
        poll_until(&mut room, Instant::now(), |r| r.modal.is_none());

        assert_eq!(room.presence().me().nickname.as_deref(), Some("abc"));
        let me = api.get_my_player(lobby.id).unwrap().unwrap();
        assert_eq!(me.nickname.as_deref(), Some("abc"));
    }

    #[test]
    fn test_modal_input_is_capped() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let mut room = RoomScreen::mount(api, lobby.id, None);
        room.open_nickname();
        for _ in 0..30 {
            room.nickname_char('x');
        }
        assert_eq!(room.modal.as_ref().unwrap().input.len(), MAX_NICKNAME_LENGTH);
        room.skip_nickname();
        assert!(room.modal.is_none());
    }

    #[test]
    fn test_second_player_enables_start() {
        let (gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let start = Instant::now();
        let mut room = RoomScreen::mount(api, lobby.id, None);
        poll_until(&mut room, start, |r| r.is_host && r.members().len() == 1);

        let guest_gw = Arc::new(gw.peer());
        guest_gw.ensure_session().unwrap();
        LobbyApi::new(guest_gw).join_lobby_by_code(&lobby.code).unwrap();

        poll_until(&mut room, start + REFETCH_INTERVAL, |r| r.members().len() == 2);
        assert_eq!(room.start_button().label, "Start");
        assert!(room.request_start());
    }

    #[test]
    fn test_guest_waits_for_host() {
        let (gw, api) = host();
        let lobby = api.create_lobby().unwrap();

        let guest_gw = Arc::new(gw.peer());
        guest_gw.ensure_session().unwrap();
        let guest = LobbyApi::new(guest_gw);
        guest.join_lobby_by_code(&lobby.code).unwrap();

        let mut room = RoomScreen::mount(guest, lobby.id, Some(lobby.code.clone()));
        poll_until(&mut room, Instant::now(), |r| r.members().len() == 2 && r.meta.is_none());
        assert!(!room.is_host);
        assert_eq!(room.start_button().label, "Waiting for host");
    }

    #[test]
    fn test_presence_marks_members_online() {
        let (_gw, api) = host();
        let lobby = api.create_lobby().unwrap();
        let mut room = RoomScreen::mount(api, lobby.id, None);
        poll_until(&mut room, Instant::now(), |r| {
            r.members().len() == 1 && r.is_online(&r.members()[0])
        });

        room.leave();
        assert!(!room.presence().is_subscribed());
    }
}

//! Application screen state management
//!
//! Handles transitions between the application screens:
//! - Connecting (waiting for the auth session)
//! - Home menu
//! - Host lobby
//! - Join lobby
//! - Lobby room
//! - Error

use super::room::RoomScreen;
use crate::gateway::{GatewayError, User};
use crate::lobby::{Lobby, LobbyApi, LobbyError};
use crate::tasks::{CancelToken, Task, TaskPoll};
use crate::validation::validate_join_code;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Shown when joining fails for any reason after validation
pub const INVALID_CODE: &str = "Invalid code";

/// Menu option on the home screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOption {
    HostLobby,
    JoinLobby,
    Quit,
}

impl MenuOption {
    /// Get all menu options in order
    pub fn all() -> &'static [MenuOption] {
        &[MenuOption::HostLobby, MenuOption::JoinLobby, MenuOption::Quit]
    }

    /// Get the display label for this option
    pub fn label(&self) -> &'static str {
        match self {
            MenuOption::HostLobby => "Host Lobby",
            MenuOption::JoinLobby => "Join Lobby",
            MenuOption::Quit => "Quit",
        }
    }
}

/// Navigation targets. A room is only reachable with a lobby id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Host,
    Join,
    Room { id: Uuid, code: Option<String> },
}

impl From<&Lobby> for Route {
    fn from(lobby: &Lobby) -> Self {
        Route::Room {
            id: lobby.id,
            code: Some(lobby.code.clone()),
        }
    }
}

/// Host screen: `Idle -> Creating -> (room | Idle)`
pub enum HostState {
    Idle,
    Creating(Task<Result<Lobby, LobbyError>>),
}

/// Join screen: `Idle -> (error | Joining -> (room | error))`
pub enum JoinState {
    Idle,
    Joining(Task<Result<Lobby, LobbyError>>),
}

/// The current application screen
pub enum Screen {
    /// Waiting for an auth session
    Connecting {
        task: Task<Result<User, GatewayError>>,
    },
    /// Home menu
    Home { selected: usize },
    /// Creating a lobby
    Host { state: HostState },
    /// Entering a join code
    Join {
        code: String,
        error: Option<String>,
        state: JoinState,
    },
    /// Inside a lobby
    Room(Box<RoomScreen>),
    /// Unrecoverable error
    Error { message: String },
}

/// Main application coordinator
pub struct AppCoordinator {
    /// Current screen
    pub screen: Screen,
    /// Whether the application should quit
    pub should_quit: bool,
    api: LobbyApi,
    /// Cancelled whenever the screen changes
    cancel: CancelToken,
}

impl AppCoordinator {
    /// Start at the connecting screen and sign in in the background.
    pub fn new(api: LobbyApi) -> Self {
        let cancel = CancelToken::new();
        let gateway = api.gateway().clone();
        let task = Task::spawn(&cancel, move || gateway.ensure_session());
        Self {
            screen: Screen::Connecting { task },
            should_quit: false,
            api,
            cancel,
        }
    }

    /// Quit the application
    pub fn quit(&mut self) {
        if let Screen::Room(room) = &mut self.screen {
            room.leave();
        }
        self.cancel.cancel();
        self.should_quit = true;
    }

    /// Replace the current screen, releasing everything it owned.
    pub fn navigate(&mut self, route: Route) {
        if let Screen::Room(room) = &mut self.screen {
            room.leave();
        }
        self.cancel.cancel();
        self.cancel = CancelToken::new();

        info!(route = ?route, "navigate");
        self.screen = match route {
            Route::Home => Screen::Home { selected: 0 },
            Route::Host => Screen::Host {
                state: HostState::Idle,
            },
            Route::Join => Screen::Join {
                code: String::new(),
                error: None,
                state: JoinState::Idle,
            },
            Route::Room { id, code } => {
                Screen::Room(Box::new(RoomScreen::mount(self.api.clone(), id, code)))
            }
        };
    }

    /// Esc: back to home, or quit from home.
    pub fn back(&mut self) {
        match &mut self.screen {
            Screen::Home { .. } | Screen::Error { .. } | Screen::Connecting { .. } => self.quit(),
            Screen::Room(room) if room.modal.is_some() => room.skip_nickname(),
            _ => self.navigate(Route::Home),
        }
    }

    /// Handle menu navigation (up)
    pub fn menu_up(&mut self) {
        if let Screen::Home { selected } = &mut self.screen {
            *selected = selected.saturating_sub(1);
        }
    }

    /// Handle menu navigation (down)
    pub fn menu_down(&mut self) {
        if let Screen::Home { selected } = &mut self.screen {
            if *selected < MenuOption::all().len() - 1 {
                *selected += 1;
            }
        }
    }

    /// Handle menu selection (Enter)
    pub fn menu_select(&mut self) {
        let Screen::Home { selected } = &self.screen else {
            return;
        };
        match MenuOption::all()[*selected] {
            MenuOption::HostLobby => self.navigate(Route::Host),
            MenuOption::JoinLobby => self.navigate(Route::Join),
            MenuOption::Quit => self.quit(),
        }
    }

    /// Host screen: create the lobby (ignored while already creating).
    pub fn host_create(&mut self) {
        if let Screen::Host { state } = &mut self.screen {
            if matches!(state, HostState::Idle) {
                let api = self.api.clone();
                *state = HostState::Creating(Task::spawn(&self.cancel, move || api.create_lobby()));
            }
        }
    }

    /// Join screen: type a character (upper-cased, at most 6).
    pub fn join_char(&mut self, c: char) {
        if let Screen::Join { code, state, .. } = &mut self.screen {
            if matches!(state, JoinState::Idle) && code.chars().count() < crate::lobby::CODE_LENGTH {
                code.extend(c.to_uppercase());
            }
        }
    }

    pub fn join_backspace(&mut self) {
        if let Screen::Join { code, state, .. } = &mut self.screen {
            if matches!(state, JoinState::Idle) {
                code.pop();
            }
        }
    }

    /// Join screen: validate, then join in the background.
    pub fn join_submit(&mut self) {
        let Screen::Join { code, error, state } = &mut self.screen else {
            return;
        };
        if !matches!(state, JoinState::Idle) {
            return;
        }
        match validate_join_code(code) {
            Err(e) => *error = Some(e.message().to_string()),
            Ok(normalised) => {
                *error = None;
                let api = self.api.clone();
                *state = JoinState::Joining(Task::spawn(&self.cancel, move || {
                    api.join_lobby_by_code(&normalised)
                }));
            }
        }
    }

    /// Room: the room screen, if mounted.
    pub fn room_mut(&mut self) -> Option<&mut RoomScreen> {
        match &mut self.screen {
            Screen::Room(room) => Some(room),
            _ => None,
        }
    }

    /// Advance background work (call regularly).
    pub fn poll(&mut self, now: Instant) {
        let mut next: Option<Route> = None;

        match &mut self.screen {
            Screen::Connecting { task } => match task.poll() {
                TaskPoll::Pending => {}
                TaskPoll::Ready(Ok(user)) => {
                    info!(user = %user.id, "session ready");
                    next = Some(Route::Home);
                }
                TaskPoll::Ready(Err(e)) => {
                    warn!(error = %e, "could not establish a session");
                    self.screen = Screen::Error {
                        message: format!("Could not connect: {}", e),
                    };
                }
                TaskPoll::Gone => {
                    self.screen = Screen::Error {
                        message: "Could not connect".to_string(),
                    };
                }
            },
            Screen::Host { state } => {
                if let HostState::Creating(task) = state {
                    match task.poll() {
                        TaskPoll::Pending => {}
                        TaskPoll::Ready(Ok(lobby)) => next = Some(Route::from(&lobby)),
                        TaskPoll::Ready(Err(e)) => {
                            warn!(error = %e, "create lobby failed");
                            *state = HostState::Idle;
                        }
                        TaskPoll::Gone => *state = HostState::Idle,
                    }
                }
            }
            Screen::Join { error, state, .. } => {
                if let JoinState::Joining(task) = state {
                    match task.poll() {
                        TaskPoll::Pending => {}
                        TaskPoll::Ready(Ok(lobby)) => next = Some(Route::from(&lobby)),
                        TaskPoll::Ready(Err(e)) => {
                            warn!(error = %e, "join lobby failed");
                            *error = Some(INVALID_CODE.to_string());
                            *state = JoinState::Idle;
                        }
                        TaskPoll::Gone => *state = JoinState::Idle,
                    }
                }
            }
            Screen::Room(room) => room.poll(now),
            Screen::Home { .. } | Screen::Error { .. } => {}
        }

        if let Some(route) = next {
            self.navigate(route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, MemoryGateway};
    use crate::lobby::members::REFETCH_INTERVAL;
    use crate::validation::is_generated_code;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn coordinator(gw: Arc<MemoryGateway>) -> AppCoordinator {
        AppCoordinator::new(LobbyApi::new(gw))
    }

    fn poll_until(app: &mut AppCoordinator, now: Instant, done: impl Fn(&AppCoordinator) -> bool) {
        for _ in 0..200 {
            app.poll(now);
            if done(app) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("coordinator never reached the expected state");
    }

    fn at_home(app: &AppCoordinator) -> bool {
        matches!(app.screen, Screen::Home { .. })
    }

    fn in_room(app: &AppCoordinator) -> bool {
        matches!(app.screen, Screen::Room(_))
    }

    fn room(app: &AppCoordinator) -> &RoomScreen {
        match &app.screen {
            Screen::Room(room) => room,
            _ => panic!("not in a room"),
        }
    }

    fn join_error(app: &AppCoordinator) -> Option<&str> {
        match &app.screen {
            Screen::Join { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    #[test]
    fn test_connecting_signs_in_then_goes_home() {
        let gw = Arc::new(MemoryGateway::new());
        let mut app = coordinator(gw.clone());
        assert!(matches!(app.screen, Screen::Connecting { .. }));
        poll_until(&mut app, Instant::now(), at_home);
        assert!(gw.current_user().is_some());
    }

    #[test]
    fn test_menu_navigation() {
        let mut app = coordinator(Arc::new(MemoryGateway::new()));
        poll_until(&mut app, Instant::now(), at_home);

        app.menu_up();
        app.menu_down();
        app.menu_down();
        app.menu_down();
        assert!(matches!(app.screen, Screen::Home { selected: 2 }));
        app.menu_select();
        assert!(app.should_quit);
    }

    #[test]
    fn test_host_flow_lands_in_room() {
        let gw = Arc::new(MemoryGateway::new());
        let mut app = coordinator(gw.clone());
        let now = Instant::now();
        poll_until(&mut app, now, at_home);

        app.menu_select();
        assert!(matches!(app.screen, Screen::Host { state: HostState::Idle }));
        app.host_create();
        assert!(matches!(app.screen, Screen::Host { state: HostState::Creating(_) }));
        // A second press while creating is ignored
        app.host_create();

        poll_until(&mut app, now, in_room);
        poll_until(&mut app, now, |a| {
            let r = room(a);
            r.is_host && r.members().len() == 1
        });

        let r = room(&app);
        let code = r.code.clone().unwrap();
        assert!(is_generated_code(&code));
        assert_eq!(gw.row_count("lobbies"), 1);
        assert_eq!(r.start_button().label, "Waiting…");

        // A second player joins and the host can start
        let guest = Arc::new(gw.peer());
        guest.ensure_session().unwrap();
        LobbyApi::new(guest).join_lobby_by_code(&code).unwrap();
        poll_until(&mut app, now + REFETCH_INTERVAL, |a| room(a).members().len() == 2);
        assert!(room(&app).start_button().enabled);
    }

    #[test]
    fn test_join_rejects_short_code() {
        let mut app = coordinator(Arc::new(MemoryGateway::new()));
        poll_until(&mut app, Instant::now(), at_home);
        app.navigate(Route::Join);

        for c in "abc12".chars() {
            app.join_char(c);
        }
        app.join_submit();
        assert_eq!(join_error(&app), Some("Code must be 6 chars"));
        assert!(matches!(app.screen, Screen::Join { state: JoinState::Idle, .. }));
    }

    #[test]
    fn test_join_input_is_capped_and_uppercased() {
        let mut app = coordinator(Arc::new(MemoryGateway::new()));
        poll_until(&mut app, Instant::now(), at_home);
        app.navigate(Route::Join);
        for c in "abcdefgh".chars() {
            app.join_char(c);
        }
        app.join_backspace();
        let Screen::Join { code, .. } = &app.screen else {
            panic!("not on join screen");
        };
        assert_eq!(code, "ABCDE");
    }

    #[test]
    fn test_join_unknown_code_shows_invalid() {
        let mut app = coordinator(Arc::new(MemoryGateway::new()));
        let now = Instant::now();
        poll_until(&mut app, now, at_home);
        app.navigate(Route::Join);
        for c in "ZZZZZZ".chars() {
            app.join_char(c);
        }
        app.join_submit();
        poll_until(&mut app, now, |a| join_error(a) == Some(INVALID_CODE));
        assert!(matches!(app.screen, Screen::Join { state: JoinState::Idle, .. }));
    }

    #[test]
    fn test_join_flow_lands_in_room_as_guest() {
        let host_gw = Arc::new(MemoryGateway::new());
        host_gw.ensure_session().unwrap();
        let lobby = LobbyApi::new(host_gw.clone()).create_lobby().unwrap();

        let mut app = coordinator(Arc::new(host_gw.peer()));
        let now = Instant::now();
        poll_until(&mut app, now, at_home);
        app.menu_down();
        app.menu_select();
        for c in lobby.code.to_lowercase().chars() {
            app.join_char(c);
        }
        app.join_submit();

        poll_until(&mut app, now, in_room);
        poll_until(&mut app, now, |a| room(a).members().len() == 2);
        let r = room(&app);
        assert_eq!(r.lobby_id, lobby.id);
        assert!(!r.is_host);
        assert_eq!(r.start_button().label, "Waiting for host");
    }

    #[test]
    fn test_leaving_room_goes_home() {
        let gw = Arc::new(MemoryGateway::new());
        let mut app = coordinator(gw.clone());
        let now = Instant::now();
        poll_until(&mut app, now, at_home);
        let lobby = LobbyApi::new(gw).create_lobby().unwrap();

        app.navigate(Route::from(&lobby));
        assert!(in_room(&app));
        // Esc first closes the nickname modal if it is open
        poll_until(&mut app, now, |a| room(a).modal.is_some());
        app.back();
        assert!(in_room(&app));
        app.back();
        assert!(at_home(&app));
    }
}

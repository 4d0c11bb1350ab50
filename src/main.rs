//! Quiz Rush - multiplayer quiz lobby client
//!
//! Host a lobby, share the code, wait for friends.

mod app;
mod config;
mod gateway;
mod lobby;
mod logging;
mod storage;
mod tasks;
mod tui;
mod validation;

use anyhow::Context;
use app::{AppCoordinator, Screen};
use clap::Parser;
use config::{Cli, Config};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use gateway::{Gateway, HttpGateway, MemoryGateway};
use lobby::LobbyApi;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::Storage;
use tracing::info;
use tui::Tui;

/// Event loop tick
const TICK_RATE: Duration = Duration::from_millis(250);

fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let config = Config::from_cli(Cli::parse())?;

    let data_dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => Storage::default_data_dir()?,
    };
    let log_path = logging::init(&data_dir, &config.log_filter)?;
    info!(log = %log_path.display(), "starting quizrush");

    let gateway: Arc<dyn Gateway> = match &config.backend {
        Some(backend) => {
            let store = Storage::open(&data_dir)
                .with_context(|| format!("opening session store in {}", data_dir.display()))?;
            let gateway = HttpGateway::new(&backend.url, &backend.anon_key, backend.request_timeout)
                .context("creating HTTP client")?
                .with_session_store(Box::new(store));
            info!(url = %backend.url, "using remote backend");
            Arc::new(gateway)
        }
        None => {
            info!("running offline");
            Arc::new(MemoryGateway::new())
        }
    };

    let mut app = AppCoordinator::new(LobbyApi::new(gateway));
    let mut terminal = Tui::new()?;
    terminal.enter()?;

    let result = run(&mut terminal, &mut app);

    terminal.exit()?;
    info!("exiting");
    result
}

fn run(terminal: &mut Tui, app: &mut AppCoordinator) -> anyhow::Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| tui::render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                // Only handle key press events (not release)
                if key.kind == KeyEventKind::Press {
                    handle_key(app, key);
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.poll(Instant::now());
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(app: &mut AppCoordinator, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.quit();
        return;
    }
    if key.code == KeyCode::Esc {
        app.back();
        return;
    }

    match &app.screen {
        Screen::Home { .. } => match key.code {
            KeyCode::Up => app.menu_up(),
            KeyCode::Down => app.menu_down(),
            KeyCode::Enter => app.menu_select(),
            _ => {}
        },
        Screen::Host { .. } => {
            if key.code == KeyCode::Enter {
                app.host_create();
            }
        }
        Screen::Join { .. } => match key.code {
            KeyCode::Char(c) if c.is_ascii_alphanumeric() => app.join_char(c),
            KeyCode::Backspace => app.join_backspace(),
            KeyCode::Enter => app.join_submit(),
            _ => {}
        },
        Screen::Room(_) => {
            if let Some(room) = app.room_mut() {
                if room.modal.is_some() {
                    match key.code {
                        KeyCode::Char(c) => room.nickname_char(c),
                        KeyCode::Backspace => room.nickname_backspace(),
                        KeyCode::Enter => room.save_nickname(),
                        _ => {}
                    }
                } else {
                    match key.code {
                        KeyCode::Enter => {
                            room.request_start();
                        }
                        KeyCode::Char('n') | KeyCode::Char('N') => room.open_nickname(),
                        _ => {}
                    }
                }
            }
        }
        Screen::Connecting { .. } | Screen::Error { .. } => {}
    }
}

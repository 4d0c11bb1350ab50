//! UI rendering using ratatui
//!
//! Supports multiple screens:
//! - Connecting: waiting for the backend session
//! - Home: main menu
//! - Host: create a lobby
//! - Join: enter a join code
//! - Room: see [`super::room`]
//! - Error: error message display

use super::room::render_room;
use crate::app::screen::{HostState, JoinState};
use crate::app::{AppCoordinator, MenuOption, Screen};
use crate::lobby::CODE_LENGTH;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

const LOGO: &str = r#"
  ___        _       ____           _
 / _ \ _   _(_)____ |  _ \ _   _ ___| |__
| | | | | | | |_  / | |_) | | | / __| '_ \
| |_| | |_| | |/ /  |  _ <| |_| \__ \ | | |
 \__\_\\__,_|_/___| |_| \_\\__,_|___/_| |_|
"#;

/// Render the appropriate screen based on app state
pub fn render(frame: &mut Frame, coordinator: &AppCoordinator) {
    match &coordinator.screen {
        Screen::Connecting { .. } => render_connecting(frame),
        Screen::Home { selected } => render_home(frame, *selected),
        Screen::Host { state } => render_host(frame, matches!(state, HostState::Creating(_))),
        Screen::Join { code, error, state } => {
            render_join(frame, code, error.as_deref(), matches!(state, JoinState::Joining(_)))
        }
        Screen::Room(room) => render_room(frame, room),
        Screen::Error { message } => render_error(frame, message),
    }
}

/// A `width` x `height` rectangle centered in `area`.
pub(super) fn center_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn render_footer(frame: &mut Frame, area: Rect, text: &str) {
    let footer = Paragraph::new(text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(footer, area);
}

fn render_connecting(frame: &mut Frame) {
    let area = center_rect(frame.area(), 40, 1);
    let text = Paragraph::new("Connecting…")
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Center);
    frame.render_widget(text, area);
}

/// Render the main menu
fn render_home(frame: &mut Frame, selected: usize) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8), // Logo
            Constraint::Length(1), // Spacer
            Constraint::Min(4),    // Menu options
            Constraint::Length(2), // Footer
        ])
        .margin(2)
        .split(area);

    let logo = Paragraph::new(LOGO)
        .style(Style::default().fg(Color::Yellow).bold())
        .alignment(Alignment::Center);
    frame.render_widget(logo, layout[0]);

    let items: Vec<ListItem> = MenuOption::all()
        .iter()
        .enumerate()
        .map(|(i, opt)| {
            let style = if i == selected {
                Style::default().fg(Color::Yellow).bold()
            } else {
                Style::default().fg(Color::White)
            };
            let prefix = if i == selected { "> " } else { "  " };
            ListItem::new(format!("{}{}", prefix, opt.label())).style(style)
        })
        .collect();
    let menu_area = center_rect(layout[2], 24, layout[2].height);
    frame.render_widget(List::new(items), menu_area);

    render_footer(frame, layout[3], "↑↓ Navigate  Enter Select  Esc Quit");
}

/// Render the host screen
fn render_host(frame: &mut Frame, creating: bool) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(3),    // Body
            Constraint::Length(2), // Footer
        ])
        .margin(1)
        .split(area);

    let header = Paragraph::new("Host a Lobby")
        .style(Style::default().fg(Color::Cyan).bold())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, layout[0]);

    let (label, style) = if creating {
        ("Creating…", Style::default().fg(Color::DarkGray))
    } else {
        ("[ Create Lobby ]", Style::default().fg(Color::Yellow).bold())
    };
    let button = Paragraph::new(label)
        .style(style)
        .alignment(Alignment::Center);
    frame.render_widget(button, center_rect(layout[1], 30, 1));

    render_footer(frame, layout[2], "Enter Create  Esc Back");
}

/// Render the join screen
fn render_join(frame: &mut Frame, code: &str, error: Option<&str>, joining: bool) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Spacer
            Constraint::Length(3), // Code input
            Constraint::Length(1), // Error
            Constraint::Length(1), // Button
            Constraint::Min(0),    // Spacer
            Constraint::Length(2), // Footer
        ])
        .margin(1)
        .split(area);

    let header = Paragraph::new("Join a Lobby")
        .style(Style::default().fg(Color::Cyan).bold())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, layout[0]);

    let placeholder = "_".repeat(CODE_LENGTH.saturating_sub(code.chars().count()));
    let input = Paragraph::new(format!("{}{}", code, placeholder))
        .style(Style::default().fg(Color::White).bold())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(" Code "));
    frame.render_widget(input, center_rect(layout[2], 16, 3));

    if let Some(error) = error {
        let error = Paragraph::new(error)
            .style(Style::default().fg(Color::Red))
            .alignment(Alignment::Center);
        frame.render_widget(error, layout[3]);
    }

    let (label, style) = if joining {
        ("Joining…", Style::default().fg(Color::DarkGray))
    } else {
        ("[ Join ]", Style::default().fg(Color::Yellow).bold())
    };
    let button = Paragraph::new(label)
        .style(style)
        .alignment(Alignment::Center);
    frame.render_widget(button, layout[4]);

    render_footer(frame, layout[6], "Type code  Enter Join  Esc Back");
}

/// Render an error message
fn render_error(frame: &mut Frame, message: &str) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .margin(2)
        .split(area);

    let error = Paragraph::new(format!("Error: {}", message))
        .style(Style::default().fg(Color::Red))
        .alignment(Alignment::Center);
    frame.render_widget(error, layout[1]);

    render_footer(frame, layout[2], "Press Esc to quit");
}

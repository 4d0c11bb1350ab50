//! Lobby room rendering
//!
//! Layout:
//! ┌─────────────────────────────────────────────────┐
//! │  QUIZ RUSH                           Online: 2  │
//! ├─────────────────────────────────────────────────┤
//! │  ╔═══════════════════════════════════════════╗  │
//! │  ║  Code: K7QH2M                             ║  │
//! │  ║  Join my Quiz Rush lobby: K7QH2M          ║  │
//! │  ╚═══════════════════════════════════════════╝  │
//! │  ╔═══════════════════════════════════════════╗  │
//! │  ║  ● Ada (You)                          0   ║  │
//! │  ║  ○ 3f2a1b                             0   ║  │
//! │  ╚═══════════════════════════════════════════╝  │
//! │                  [ Start ]                      │
//! │  [Enter] Start  [N] Nickname  [ESC] Leave       │
//! └─────────────────────────────────────────────────┘

use super::ui::center_rect;
use crate::app::room::NicknameModal;
use crate::app::RoomScreen;
use crate::lobby::Member;
use crate::validation::MAX_NICKNAME_LENGTH;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

/// Render the room screen
pub fn render_room(frame: &mut Frame, room: &RoomScreen) {
    let area = frame.area();

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
        ])
        .split(area);

    render_room_header(frame, layout[0], room.presence().roster().len());
    render_room_content(frame, layout[1], room);

    if let Some(modal) = &room.modal {
        render_nickname_modal(frame, area, modal);
    }
}

/// Logo on the left, online count on the right
fn render_room_header(frame: &mut Frame, area: Rect, online: usize) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let header_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(12), // Logo
            Constraint::Min(0),     // Spacer
            Constraint::Length(12), // Online count
        ])
        .split(inner);

    let logo = Paragraph::new("QUIZ RUSH")
        .style(Style::default().fg(Color::Yellow).bold())
        .alignment(Alignment::Left);
    frame.render_widget(logo, header_layout[0]);

    let count = Paragraph::new(format!("Online: {}", online))
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Right);
    frame.render_widget(count, header_layout[2]);
}

fn render_room_content(frame: &mut Frame, area: Rect, room: &RoomScreen) {
    let members = room.members();
    let content_layout = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(4),                         // Code card
            Constraint::Length(members.len() as u16 + 2), // Players box
            Constraint::Length(1),                         // Spacer
            Constraint::Length(1),                         // Start button
            Constraint::Min(0),                            // Spacer
            Constraint::Length(1),                         // Instructions
        ])
        .split(area);

    render_code_card(frame, content_layout[0], room);
    render_players_list(frame, content_layout[1], room, members);
    render_start_button(frame, content_layout[3], room);
    render_room_instructions(frame, content_layout[5]);
}

fn render_code_card(frame: &mut Frame, area: Rect, room: &RoomScreen) {
    let code = room.code.as_deref().unwrap_or("……");
    let mut lines = vec![Line::from(vec![
        Span::styled("Code: ", Style::default().fg(Color::Gray)),
        Span::styled(code.to_string(), Style::default().fg(Color::Yellow).bold()),
    ])];
    if let Some(invite) = room.invite_message() {
        lines.push(Line::styled(invite, Style::default().fg(Color::DarkGray)));
    }

    let card = Paragraph::new(lines).block(
        Block::default()
            .title(" Lobby ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    frame.render_widget(card, area);
}

/// One row of the player list: online marker, name, "(You)" and score.
fn member_line(member: &Member, online: bool, me: bool) -> String {
    let marker = if online { "●" } else { "○" };
    let you = if me { " (You)" } else { "" };
    format!("{} {}{}  {}", marker, member.display_name(), you, member.score)
}

fn render_players_list(frame: &mut Frame, area: Rect, room: &RoomScreen, members: &[Member]) {
    let items: Vec<ListItem> = members
        .iter()
        .map(|member| {
            let online = room.is_online(member);
            let me = room.is_me(member);
            let style = if me {
                Style::default().fg(Color::Green).bold()
            } else if online {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(member_line(member, online, me)).style(style)
        })
        .collect();

    let title = if room.members_stale() {
        format!(" Players ({}) - reconnecting ", members.len())
    } else {
        format!(" Players ({}) ", members.len())
    };
    let list = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );
    frame.render_widget(list, area);
}

fn render_start_button(frame: &mut Frame, area: Rect, room: &RoomScreen) {
    let button = room.start_button();
    let style = if button.enabled {
        Style::default().fg(Color::Black).bg(Color::Green).bold()
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let para = Paragraph::new(format!("[ {} ]", button.label))
        .style(style)
        .alignment(Alignment::Center);
    frame.render_widget(para, area);
}

fn render_room_instructions(frame: &mut Frame, area: Rect) {
    let para = Paragraph::new("[Enter] Start    [N] Nickname    [ESC] Leave")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(para, area);
}

/// "Choose a nickname" overlay
fn render_nickname_modal(frame: &mut Frame, area: Rect, modal: &NicknameModal) {
    let popup_area = center_rect(area, MAX_NICKNAME_LENGTH as u16 + 16, 8);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .title(" Choose a nickname ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .style(Style::default().bg(Color::Black));
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let (error, error_style) = match &modal.error {
        Some(error) => (error.as_str(), Style::default().fg(Color::Red)),
        None => ("", Style::default()),
    };
    let action = if modal.is_saving() {
        "Saving…"
    } else {
        "[Enter] Save    [ESC] Skip"
    };

    let text = vec![
        Line::raw(""),
        Line::styled(
            format!("> {}_", modal.input),
            Style::default().fg(Color::White).bold(),
        ),
        Line::styled(error, error_style),
        Line::raw(""),
        Line::styled(action, Style::default().fg(Color::DarkGray)),
    ];
    let para = Paragraph::new(text).alignment(Alignment::Center);
    frame.render_widget(para, inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn member(nickname: Option<&str>, score: i64) -> Member {
        Member {
            user_id: Uuid::parse_str("3f2a1b00-0000-0000-0000-000000000000").unwrap(),
            nickname: nickname.map(str::to_string),
            score,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_member_line_marks_self_and_online() {
        assert_eq!(member_line(&member(Some("Ada"), 7), true, true), "● Ada (You)  7");
    }

    #[test]
    fn test_member_line_falls_back_to_short_id() {
        assert_eq!(member_line(&member(None, 0), false, false), "○ 3f2a1b  0");
    }
}

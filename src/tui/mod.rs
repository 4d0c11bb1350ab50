//! Terminal UI components using ratatui

mod room;
mod terminal;
mod ui;

pub use terminal::Tui;
pub use ui::render;

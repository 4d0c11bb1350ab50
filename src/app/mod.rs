//! Application state and core logic

pub mod room;
pub mod screen;

pub use room::RoomScreen;
pub use screen::{AppCoordinator, MenuOption, Route, Screen};

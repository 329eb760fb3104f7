//! StoryCollab Server Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod config;
pub mod game;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use game::state::{GameState, ViewMode};
pub use protocol::{ClientMessage, GameEvent, ServerMessage};
pub use server::AppState;
pub use session::coordinator::{LinkState, Role, SessionCoordinator};
pub use session::manager::SessionManager;

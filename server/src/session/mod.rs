//! Shared story sessions
//!
//! The relay-side session registry (`state`, `manager`) and the peer-side
//! synchronization core (`coordinator`, `dispatch`).

pub mod coordinator;
pub mod dispatch;
pub mod manager;
pub mod state;

pub use coordinator::{EventTube, LinkState, Role, SessionCoordinator};
pub use manager::{SessionManager, StoryError};
pub use state::{Story, StoryConfig, StoryId, StoryState};

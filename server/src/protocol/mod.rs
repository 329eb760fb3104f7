//! Wire formats
//!
//! Two layers travel over the collaboration channel: the relay envelope
//! (`ClientMessage`/`ServerMessage`) and, opaque inside it, the game events
//! peers exchange (`GameEvent`).

pub mod events;
pub mod messages;

pub use events::{EventError, GameEvent};
pub use messages::*;

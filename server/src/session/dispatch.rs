//! Uniform event application.
//!
//! A decoded [`GameEvent`] mutates the grid the same way whether it came
//! from the local UI or from a remote peer; the only difference between
//! the two origins is whether a broadcast follows, and that is the
//! coordinator's business, not this module's.

use crate::game::state::{GameError, GameState};
use crate::protocol::GameEvent;

/// Apply one event to the grid.
pub fn apply(game: &mut GameState, event: &GameEvent) -> Result<(), GameError> {
    match event {
        GameEvent::NewGame(ids) => game.apply_new_game(ids),
        GameEvent::DotClick { slot, value } => game.set_slot(*slot, *value),
    }
}

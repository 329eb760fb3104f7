//! Story grid state and persistence format
//!
//! Holds the canonical 3x3 picture grid and the codec for the journal
//! metadata record it is saved to and restored from.

pub mod journal;
pub mod state;

pub use journal::{Journal, JournalError};
pub use state::{GRID_SLOTS, GameError, GameState, Slot, ViewMode};

use crate::game::state::GRID_SLOTS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire tag for a full grid replacement
const NEW_GAME_TAG: &str = "n";
/// Wire tag for a single-slot mutation
const DOT_CLICK_TAG: &str = "p";

/// Event decoding errors. Callers log and drop; a bad message never takes
/// the session down.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown command tag {0:?}")]
    UnknownCommand(String),

    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("bad {tag:?} payload: {reason}")]
    BadPayload { tag: &'static str, reason: String },
}

/// A game event exchanged between peers.
///
/// The single-letter command tags and the doubly-encoded JSON payload are
/// kept for wire compatibility with existing activity builds: the envelope
/// is `{"command": "n"|"p", "payload": "<json>"}` where the payload string
/// holds an array of nine integers (`n`) or `[slotIndex, value]` (`p`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Replace the whole grid with the initiator's image set
    NewGame(Vec<i64>),
    /// Set one slot's value (any peer may click)
    DotClick { slot: usize, value: i64 },
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    command: String,
    payload: String,
}

impl GameEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            GameEvent::NewGame(_) => NEW_GAME_TAG,
            GameEvent::DotClick { .. } => DOT_CLICK_TAG,
        }
    }

    /// Human-readable event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::NewGame(_) => "new_game",
            GameEvent::DotClick { .. } => "dot_click",
        }
    }

    /// Serialize to the transport-ready opaque string
    pub fn to_wire(&self) -> Result<String, EventError> {
        let payload = match self {
            GameEvent::NewGame(ids) => serde_json::to_string(ids)?,
            GameEvent::DotClick { slot, value } => {
                serde_json::to_string(&[*slot as i64, *value])?
            }
        };
        let wire = WireEvent {
            command: self.tag().to_string(),
            payload,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse a received opaque string back into an event
    pub fn from_wire(raw: &str) -> Result<Self, EventError> {
        let wire: WireEvent = serde_json::from_str(raw)?;
        match wire.command.as_str() {
            NEW_GAME_TAG => {
                let ids: Vec<i64> = serde_json::from_str(&wire.payload)?;
                if ids.len() != GRID_SLOTS {
                    return Err(EventError::BadPayload {
                        tag: NEW_GAME_TAG,
                        reason: format!("expected {GRID_SLOTS} slot values, got {}", ids.len()),
                    });
                }
                Ok(GameEvent::NewGame(ids))
            }
            DOT_CLICK_TAG => {
                let pair: [i64; 2] = serde_json::from_str(&wire.payload)?;
                let slot = usize::try_from(pair[0]).map_err(|_| EventError::BadPayload {
                    tag: DOT_CLICK_TAG,
                    reason: format!("negative slot index {}", pair[0]),
                })?;
                Ok(GameEvent::DotClick {
                    slot,
                    value: pair[1],
                })
            }
            other => Err(EventError::UnknownCommand(other.to_string())),
        }
    }
}

//! Journal metadata record codec.
//!
//! The activity persists its state as a flat string-to-string metadata
//! record: a space-separated `dotlist` of the nine slot images, a `mode`
//! key, caption keys (`text` for the whole grid in array mode, `text-<i>`
//! per slot in linear mode), a `dirty` flag and a `uid` linking audio-note
//! records. The key names and value encodings are a hard contract with
//! existing journal entries.

use crate::game::state::{GRID_SLOTS, GameError, GameState, ViewMode};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub const DOTLIST_KEY: &str = "dotlist";
pub const MODE_KEY: &str = "mode";
pub const TEXT_KEY: &str = "text";
pub const DIRTY_KEY: &str = "dirty";
pub const UID_KEY: &str = "uid";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("journal record has no {0:?} key")]
    MissingKey(&'static str),

    #[error("malformed dotlist entry: {0:?}")]
    BadDotlist(String),

    #[error("unknown view mode: {0:?}")]
    BadMode(String),

    #[error(transparent)]
    Game(#[from] GameError),
}

/// A journal metadata record: the persisted form of a story.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    entries: BTreeMap<String, String>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Write the whole grid to the record. The grid is stored atomically:
    /// either all nine slots are present in `dotlist` or the key is absent.
    pub fn write_state(&mut self, game: &GameState) {
        self.entries
            .insert(DOTLIST_KEY.to_string(), encode_dotlist(&game.save()));
        self.entries
            .insert(MODE_KEY.to_string(), game.mode().as_str().to_string());
        self.set_dirty(game.is_dirty());

        match game.story_text() {
            Some(text) => {
                self.entries.insert(TEXT_KEY.to_string(), text.to_string());
            }
            None => {
                self.entries.remove(TEXT_KEY);
            }
        }
        for index in 0..GRID_SLOTS {
            let key = slot_text_key(index);
            match game.slot_text(index).ok().flatten() {
                Some(text) => {
                    self.entries.insert(key, text.to_string());
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Rebuild grid state from the record. All record validation happens
    /// before the first mutation, so a bad dotlist or mode value fails
    /// without touching the grid.
    pub fn restore_state(&self, game: &mut GameState) -> Result<(), JournalError> {
        let dotlist = self
            .get(DOTLIST_KEY)
            .ok_or(JournalError::MissingKey(DOTLIST_KEY))?;
        let ids = parse_dotlist(dotlist)?;
        let mode = self
            .get(MODE_KEY)
            .map(|m| {
                m.parse::<ViewMode>()
                    .map_err(|_| JournalError::BadMode(m.to_string()))
            })
            .transpose()?;

        game.restore(&ids)?;
        if let Some(mode) = mode {
            game.set_mode(mode);
        }

        game.set_story_text(
            self.get(TEXT_KEY)
                .filter(|t| !t.is_empty())
                .map(String::from),
        );
        for index in 0..GRID_SLOTS {
            let text = self
                .get(&slot_text_key(index))
                .filter(|t| !t.is_empty())
                .map(String::from);
            game.set_slot_text(index, text)?;
        }

        // The dirty flag is restored last so stale caption writes above do
        // not leave a freshly loaded story marked as modified.
        game.set_dirty(self.is_dirty());
        debug!("restored story from journal record");
        Ok(())
    }

    /// Whether the record marks unsaved work. Legacy records stored the
    /// Python literals `True`/`False`; both spellings are accepted.
    pub fn is_dirty(&self) -> bool {
        self.get(DIRTY_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.entries
            .insert(DIRTY_KEY.to_string(), dirty.to_string());
    }

    /// The story's uid, generating and storing one on first use
    pub fn ensure_uid(&mut self) -> &str {
        self.entries
            .entry(UID_KEY.to_string())
            .or_insert_with(generate_uid)
    }

    pub fn uid(&self) -> Option<&str> {
        self.get(UID_KEY)
    }
}

/// Tag under which an audio note for this story is filed: the bare uid in
/// array mode, `uid-<slot>` in linear mode.
pub fn audio_note_tag(uid: &str, mode: ViewMode, slot: usize) -> String {
    match mode {
        ViewMode::Array => uid.to_string(),
        ViewMode::Linear => format!("{uid}-{slot}"),
    }
}

/// Encode slot images as the space-separated ASCII dotlist
pub fn encode_dotlist(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode a dotlist string into slot images
pub fn parse_dotlist(dotlist: &str) -> Result<Vec<i64>, JournalError> {
    dotlist
        .split_whitespace()
        .map(|tok| {
            tok.parse::<i64>()
                .map_err(|_| JournalError::BadDotlist(tok.to_string()))
        })
        .collect()
}

/// Short uppercase-hex story uid, `XXXX-XXXX`
pub fn generate_uid() -> String {
    let bits = uuid::Uuid::new_v4().as_u128();
    format!("{:04X}-{:04X}", (bits >> 16) as u16, bits as u16)
}

fn slot_text_key(index: usize) -> String {
    format!("{TEXT_KEY}-{index}")
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of picture slots in the grid (fixed 3x3)
pub const GRID_SLOTS: usize = 9;

/// Sentinel for an unset slot in saved/wire integer form
pub const UNSET: i64 = -1;

/// Grid state errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("slot index {0} out of range (0-{max})", max = GRID_SLOTS - 1)]
    InvalidIndex(usize),

    #[error("expected {GRID_SLOTS} slot values, got {0}")]
    LengthMismatch(usize),
}

/// How the grid is displayed: all nine slots at once, or one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Array,
    Linear,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Array => "array",
            ViewMode::Linear => "linear",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "array" => Ok(ViewMode::Array),
            "linear" => Ok(ViewMode::Linear),
            other => Err(other.to_string()),
        }
    }
}

/// One position in the picture grid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    /// Index into the available picture set; `None` until a game is started
    pub image: Option<u32>,
    /// Per-slot caption (linear mode narration)
    pub text: Option<String>,
    /// Whether an audio note has been recorded for this slot
    pub has_audio_note: bool,
}

impl Slot {
    fn saved_image(&self) -> i64 {
        self.image.map_or(UNSET, i64::from)
    }
}

/// Canonical grid contents plus display state.
///
/// Mutated exclusively from a single task: local UI actions and remote
/// events both arrive on the same event loop, so there is no locking here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    slots: [Slot; GRID_SLOTS],
    mode: ViewMode,
    current: usize,
    /// Whole-grid caption used in array mode
    story_text: Option<String>,
    /// Whether an audio note covers the whole grid (array mode)
    story_has_audio: bool,
    /// User has produced unsaved work
    dirty: bool,
}

impl GameState {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
            mode: ViewMode::Array,
            current: 0,
            story_text: None,
            story_has_audio: false,
            dirty: false,
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Result<&Slot, GameError> {
        self.slots.get(index).ok_or(GameError::InvalidIndex(index))
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Switch display mode. Entering linear mode starts back at the first
    /// slot; slot contents are never touched by a mode change.
    pub fn set_mode(&mut self, mode: ViewMode) {
        if mode == ViewMode::Linear && self.mode != ViewMode::Linear {
            self.current = 0;
        }
        self.mode = mode;
    }

    /// Currently displayed slot (meaningful in linear mode only)
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) -> Result<(), GameError> {
        if index >= GRID_SLOTS {
            return Err(GameError::InvalidIndex(index));
        }
        self.current = index;
        Ok(())
    }

    /// Advance to the next slot, stopping at the last one
    pub fn next(&mut self) {
        if self.current + 1 < GRID_SLOTS {
            self.current += 1;
        }
    }

    /// Step back to the previous slot, stopping at the first one
    pub fn previous(&mut self) {
        self.current = self.current.saturating_sub(1);
    }

    /// Start a new game with the given picture set indices.
    ///
    /// Replaces every slot image and clears all narration: captions, audio
    /// flags and the dirty flag all reset, and display returns to slot 0.
    pub fn new_game(&mut self, ids: [u32; GRID_SLOTS]) {
        self.replace_grid(ids.map(Some));
    }

    /// Apply a full grid replacement from wire form (the `NEW_GAME` event).
    ///
    /// Same visible transition as [`GameState::new_game`]; fails without
    /// modifying the grid if the payload is not exactly nine values.
    pub fn apply_new_game(&mut self, ids: &[i64]) -> Result<(), GameError> {
        let images = images_from_saved(ids)?;
        self.replace_grid(images);
        Ok(())
    }

    fn replace_grid(&mut self, images: [Option<u32>; GRID_SLOTS]) {
        for (slot, image) in self.slots.iter_mut().zip(images) {
            *slot = Slot {
                image,
                text: None,
                has_audio_note: false,
            };
        }
        self.story_text = None;
        self.story_has_audio = false;
        self.current = 0;
        self.dirty = false;
    }

    /// Set a single slot's image from wire form; `-1` unsets it
    pub fn set_slot(&mut self, index: usize, value: i64) -> Result<(), GameError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(GameError::InvalidIndex(index))?;
        slot.image = u32::try_from(value).ok();
        Ok(())
    }

    /// Snapshot of the nine slot images, `-1` standing in for unset.
    ///
    /// Used both for the journal record and for sharing the grid with
    /// late joiners.
    pub fn save(&self) -> [i64; GRID_SLOTS] {
        std::array::from_fn(|i| self.slots[i].saved_image())
    }

    /// Inverse of [`GameState::save`]: restore slot images only (captions
    /// and audio flags come from the journal record separately). On a
    /// length mismatch the grid is left unmodified.
    pub fn restore(&mut self, ids: &[i64]) -> Result<(), GameError> {
        let images = images_from_saved(ids)?;
        for (slot, image) in self.slots.iter_mut().zip(images) {
            slot.image = image;
        }
        Ok(())
    }

    pub fn slot_text(&self, index: usize) -> Result<Option<&str>, GameError> {
        Ok(self.slot(index)?.text.as_deref())
    }

    pub fn set_slot_text(&mut self, index: usize, text: Option<String>) -> Result<(), GameError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(GameError::InvalidIndex(index))?;
        if text.is_some() {
            self.dirty = true;
        }
        slot.text = text;
        Ok(())
    }

    pub fn story_text(&self) -> Option<&str> {
        self.story_text.as_deref()
    }

    pub fn set_story_text(&mut self, text: Option<String>) {
        if text.is_some() {
            self.dirty = true;
        }
        self.story_text = text;
    }

    pub fn set_audio_note(&mut self, index: usize, recorded: bool) -> Result<(), GameError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(GameError::InvalidIndex(index))?;
        slot.has_audio_note = recorded;
        if recorded {
            self.dirty = true;
        }
        Ok(())
    }

    pub fn story_has_audio(&self) -> bool {
        self.story_has_audio
    }

    pub fn set_story_audio(&mut self, recorded: bool) {
        self.story_has_audio = recorded;
        if recorded {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Clear all narration without touching the images, as the UI does
    /// before overwriting a story the user confirmed discarding
    pub fn clear_story_work(&mut self) {
        for slot in &mut self.slots {
            slot.text = None;
            slot.has_audio_note = false;
        }
        self.story_text = None;
        self.story_has_audio = false;
        self.dirty = false;
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

fn images_from_saved(ids: &[i64]) -> Result<[Option<u32>; GRID_SLOTS], GameError> {
    let ids: [i64; GRID_SLOTS] = ids
        .try_into()
        .map_err(|_| GameError::LengthMismatch(ids.len()))?;
    Ok(ids.map(|id| u32::try_from(id).ok()))
}

/// Draw nine random picture indices for a fresh game
pub fn random_picture_ids(picture_count: u32) -> [u32; GRID_SLOTS] {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let picture_count = picture_count.max(1);
    let hasher = RandomState::new();

    std::array::from_fn(|i| {
        let mut h = hasher.build_hasher();
        h.write_usize(i);
        h.write_u128(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
        );
        h.write_u128(uuid::Uuid::new_v4().as_u128());

        (h.finish() % u64::from(picture_count)) as u32
    })
}

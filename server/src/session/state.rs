use crate::game::state::{GRID_SLOTS, ViewMode};
use crate::protocol::{Participant, PeerRole, XoColors};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Story ID: 10-character base32 string (lowercase, a-z + 2-7)
pub type StoryId = String;

/// Charset for story IDs: lowercase base32 (a-z, 2-7) to avoid 0/1 confusion
const STORY_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
const STORY_ID_LENGTH: usize = 10;

/// Generate a random story ID
pub fn generate_story_id() -> StoryId {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut id = String::with_capacity(STORY_ID_LENGTH);
    let hasher = RandomState::new();

    // Use multiple hash sources for randomness
    for i in 0..STORY_ID_LENGTH {
        let mut h = hasher.build_hasher();
        h.write_usize(i);
        h.write_u128(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
        );
        h.write_u128(Uuid::new_v4().as_u128());

        let idx = (h.finish() as usize) % STORY_ID_CHARSET.len();
        id.push(STORY_ID_CHARSET[idx] as char);
    }

    id
}

/// Generate a high-entropy secret for join links
pub fn generate_secret(bits: usize) -> String {
    let bytes_needed = bits.div_ceil(8);
    let mut secret = String::with_capacity(bytes_needed * 2);

    for _ in 0..bytes_needed {
        let byte = (Uuid::new_v4().as_u128() & 0xFF) as u8;
        secret.push_str(&format!("{:02x}", byte));
    }

    secret
}

/// Story lifecycle state
#[derive(Debug, Clone)]
pub enum StoryState {
    Active,
    InitiatorDisconnected { disconnect_at: u64 },
    Expired,
}

/// Full story session data
#[derive(Debug, Clone)]
pub struct Story {
    // Identity
    pub id: StoryId,
    pub rev: u64,
    pub join_secret_hash: String,

    // Timestamps
    pub created_at: u64,
    pub expires_at: u64,

    // Lifecycle
    pub state: StoryState,

    // Peers
    pub initiator_id: Uuid,
    pub participants: HashMap<Uuid, StoryParticipant>,

    // Latest grid as play has left it, seeding late-joiner snapshots
    pub grid: [i64; GRID_SLOTS],
    pub mode: ViewMode,
}

/// Peer within a story session (extended data)
#[derive(Debug, Clone)]
pub struct StoryParticipant {
    pub id: Uuid,
    pub nick: String,
    pub colors: XoColors,
    pub role: PeerRole,
    pub connected_at: u64,
    pub last_seen_at: u64,
}

impl StoryParticipant {
    pub fn to_participant(&self) -> Participant {
        Participant {
            id: self.id,
            nick: self.nick.clone(),
            colors: self.colors.clone(),
            role: self.role,
            connected_at: self.connected_at,
        }
    }
}

/// Session configuration
pub struct StoryConfig {
    pub max_duration: Duration,
    pub initiator_grace_period: Duration,
    /// The activity caps a shared story at four participants: the
    /// initiator plus three joiners.
    pub max_joiners: usize,
    /// Size of the picture set new story grids are drawn from
    pub picture_count: u32,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(4 * 60 * 60), // 4 hours
            initiator_grace_period: Duration::from_secs(30),
            max_joiners: 3,
            picture_count: 36,
        }
    }
}

/// Validation rules
pub fn validate_story_id(id: &str) -> bool {
    if id.len() != STORY_ID_LENGTH {
        return false;
    }
    id.chars().all(|c| STORY_ID_CHARSET.contains(&(c as u8)))
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Sugar XO buddy color pairs (stroke, fill) handed out to peers in turn
const XO_COLOR_PAIRS: &[(&str, &str)] = &[
    ("#A0FFA0", "#FF8080"),
    ("#8080FF", "#FFFF80"),
    ("#FF8080", "#80FFFF"),
    ("#FFFF80", "#A0A0FF"),
    ("#80FFFF", "#FFA0A0"),
    ("#A0A0FF", "#A0FFA0"),
    ("#FFA0A0", "#8080FF"),
    ("#D0A0FF", "#FFFFA0"),
];

pub fn get_peer_colors(index: usize) -> XoColors {
    let (stroke, fill) = XO_COLOR_PAIRS[index % XO_COLOR_PAIRS.len()];
    XoColors {
        stroke: stroke.to_string(),
        fill: fill.to_string(),
    }
}

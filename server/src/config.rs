//! Server configuration
//!
//! Configuration is loaded from environment variables.

use std::env;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Public base URL for join-link generation (optional)
    pub public_base_url: Option<String>,

    /// Story session configuration
    pub story: StorySection,

    /// Picture set configuration
    pub pictures: PictureSection,
}

/// Story-session-related configuration
#[derive(Debug, Clone)]
pub struct StorySection {
    /// Maximum number of joiners per story (initiator not counted)
    pub max_joiners: usize,
    /// Story maximum duration
    pub max_duration: Duration,
    /// Grace period after the initiator disconnects
    pub initiator_grace_period: Duration,
}

/// Picture-set-related configuration
#[derive(Debug, Clone)]
pub struct PictureSection {
    /// Number of pictures available for random grids
    pub count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: None,
            story: StorySection::default(),
            pictures: PictureSection::default(),
        }
    }
}

impl Default for StorySection {
    fn default() -> Self {
        Self {
            max_joiners: 3,
            max_duration: Duration::from_secs(4 * 60 * 60), // 4 hours
            initiator_grace_period: Duration::from_secs(30),
        }
    }
}

impl Default for PictureSection {
    fn default() -> Self {
        // Shipping activity bundles carry a few dozen picture SVGs
        Self { count: 36 }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(url) = env::var("PUBLIC_BASE_URL")
            && !url.is_empty()
        {
            config.public_base_url = Some(url);
        }

        // Story config
        if let Ok(val) = env::var("MAX_JOINERS")
            && let Ok(v) = val.parse()
        {
            config.story.max_joiners = v;
        }
        if let Ok(val) = env::var("STORY_MAX_DURATION_HOURS")
            && let Ok(hours) = val.parse::<u64>()
        {
            config.story.max_duration = Duration::from_secs(hours * 60 * 60);
        }
        if let Ok(val) = env::var("INITIATOR_GRACE_PERIOD_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.story.initiator_grace_period = Duration::from_secs(secs);
        }

        // Picture config
        if let Ok(val) = env::var("PICTURE_COUNT")
            && let Ok(count) = val.parse()
        {
            config.pictures.count = count;
        }

        config
    }
}

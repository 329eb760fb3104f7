use crate::game::state::random_picture_ids;
use crate::protocol::{
    GameEvent, Participant, PeerRole, ServerMessage, SessionEndReason, StorySnapshot,
};
use crate::session::state::{
    Story, StoryConfig, StoryId, StoryParticipant, StoryState, generate_secret,
    generate_story_id, get_peer_colors, now_millis,
};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session manager errors
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("Story not found: {0}")]
    NotFound(StoryId),

    #[error("Story is full (max {0} joiners)")]
    StoryFull(usize),

    #[error("Story has expired")]
    StoryExpired,

    #[error("Invalid join secret")]
    InvalidJoinSecret,

    #[error("Participant not found: {0}")]
    ParticipantNotFound(Uuid),

    #[error("Bad slot index {0} in relayed event")]
    BadSlotIndex(usize),
}

/// Session manager: owns the story session registry
pub struct SessionManager {
    stories: Arc<RwLock<HashMap<StoryId, Story>>>,
    config: StoryConfig,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            stories: Arc::new(RwLock::new(HashMap::new())),
            config: StoryConfig::default(),
        }
    }

    pub fn with_config(config: StoryConfig) -> Self {
        Self {
            stories: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Share a new story: the creating peer becomes its initiator
    pub async fn create_story(
        &self,
        nick: &str,
        initiator_connection_id: Uuid,
    ) -> Result<(Story, String), StoryError> {
        let start = Instant::now();
        counter!("storycollab_stories_created_total").increment(1);

        let story_id = generate_story_id();
        let join_secret = generate_secret(128);
        let join_secret_hash = hash_secret(&join_secret);

        let now = now_millis();
        let expires_at = now + self.config.max_duration.as_millis() as u64;

        let initiator_id = Uuid::new_v4();
        let initiator = StoryParticipant {
            id: initiator_id,
            nick: nick.to_string(),
            colors: get_peer_colors(0),
            role: PeerRole::Initiator,
            connected_at: now,
            last_seen_at: now,
        };

        let mut participants = HashMap::new();
        participants.insert(initiator_id, initiator);

        let story = Story {
            id: story_id.clone(),
            rev: 1,
            join_secret_hash,
            created_at: now,
            expires_at,
            state: StoryState::Active,
            initiator_id,
            participants,
            // Drawn server-side so the first snapshot already carries a
            // playable grid; the initiator's first NewGame overwrites it
            grid: random_picture_ids(self.config.picture_count).map(i64::from),
            mode: crate::game::state::ViewMode::Array,
        };

        info!(
            "Created story {} for initiator {} ({})",
            story_id, nick, initiator_connection_id
        );

        let story = {
            let mut stories = self.stories.write().await;
            stories.insert(story_id.clone(), story);
            stories
                .get(&story_id)
                .cloned()
                .ok_or_else(|| StoryError::NotFound(story_id))?
        };

        histogram!("storycollab_story_create_duration_seconds").record(start.elapsed());
        Ok((story, join_secret))
    }

    /// Join an existing story as a joiner
    pub async fn join_story(
        &self,
        story_id: &str,
        join_secret: &str,
        nick: &str,
    ) -> Result<(StorySnapshot, Participant), StoryError> {
        let start = Instant::now();
        counter!("storycollab_story_joins_total").increment(1);

        let mut stories = self.stories.write().await;

        let story = stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;

        if matches!(story.state, StoryState::Expired) {
            return Err(StoryError::StoryExpired);
        }

        if !verify_secret(join_secret, &story.join_secret_hash) {
            return Err(StoryError::InvalidJoinSecret);
        }

        let joiner_count = story
            .participants
            .values()
            .filter(|p| p.role == PeerRole::Joiner)
            .count();
        if joiner_count >= self.config.max_joiners {
            return Err(StoryError::StoryFull(self.config.max_joiners));
        }

        let now = now_millis();
        let participant_id = Uuid::new_v4();
        let color_index = story.participants.len();

        let participant = StoryParticipant {
            id: participant_id,
            nick: nick.to_string(),
            colors: get_peer_colors(color_index),
            role: PeerRole::Joiner,
            connected_at: now,
            last_seen_at: now,
        };

        let participant_data = participant.to_participant();
        story.participants.insert(participant_id, participant);
        story.rev += 1;

        info!("Peer {} ({}) joined story {}", nick, participant_id, story_id);

        let snapshot = create_story_snapshot(story);

        histogram!("storycollab_story_participants").record(story.participants.len() as f64);
        histogram!("storycollab_story_join_duration_seconds").record(start.elapsed());

        Ok((snapshot, participant_data))
    }

    /// Get a story snapshot
    pub async fn get_story(&self, story_id: &str) -> Result<StorySnapshot, StoryError> {
        let stories = self.stories.read().await;

        let story = stories
            .get(story_id)
            .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;

        Ok(create_story_snapshot(story))
    }

    /// Fold a relayed game event into the stored grid so snapshots handed
    /// to late joiners reflect play so far. Returns the new revision.
    pub async fn apply_event(
        &self,
        story_id: &str,
        event: &GameEvent,
    ) -> Result<u64, StoryError> {
        let mut stories = self.stories.write().await;

        let story = stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;

        fold_event(story, event)?;
        story.rev += 1;

        counter!("storycollab_events_relayed_total", "event" => event.name()).increment(1);
        debug!("Story {} advanced to rev {}", story_id, story.rev);

        Ok(story.rev)
    }

    /// Fold a relayed game event into the stored grid and hand `msg` to the
    /// given peers before releasing the lock. The stories lock is the
    /// per-story ordering point: delivery order always matches the fold
    /// order, so a late joiner's snapshot never disagrees with what the
    /// live peers have been sent. Returns the new revision.
    pub async fn relay_event(
        &self,
        story_id: &str,
        event: &GameEvent,
        msg: &ServerMessage,
        peers: &[mpsc::Sender<ServerMessage>],
    ) -> Result<u64, StoryError> {
        let mut stories = self.stories.write().await;

        let story = stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;

        fold_event(story, event)?;
        story.rev += 1;

        for peer in peers {
            let _ = peer.send(msg.clone()).await;
        }

        counter!("storycollab_events_relayed_total", "event" => event.name()).increment(1);
        debug!("Story {} advanced to rev {}", story_id, story.rev);

        Ok(story.rev)
    }

    /// Remove a peer from a story. Returns whether the initiator left.
    pub async fn remove_participant(
        &self,
        story_id: &str,
        participant_id: Uuid,
    ) -> Result<bool, StoryError> {
        let mut stories = self.stories.write().await;

        let story = stories
            .get_mut(story_id)
            .ok_or_else(|| StoryError::NotFound(story_id.to_string()))?;

        if story.participants.remove(&participant_id).is_none() {
            return Err(StoryError::ParticipantNotFound(participant_id));
        }

        let was_initiator = story.initiator_id == participant_id;
        story.rev += 1;

        counter!("storycollab_story_leaves_total", "role" => if was_initiator { "initiator" } else { "joiner" }).increment(1);

        if was_initiator {
            // Start the grace period; joiners keep playing single-player
            story.state = StoryState::InitiatorDisconnected {
                disconnect_at: now_millis(),
            };
            warn!(
                "Initiator left story {}, starting grace period",
                story_id
            );
        }

        debug!("Peer {} removed from story {}", participant_id, story_id);

        Ok(was_initiator)
    }

    /// Clean up expired stories. Returns the removed stories with the
    /// reason they ended, so the transport can tell the remaining peers.
    pub async fn cleanup_expired(&self) -> Vec<(StoryId, SessionEndReason)> {
        let now = now_millis();
        let grace = self.config.initiator_grace_period.as_millis() as u64;
        let mut stories = self.stories.write().await;

        let expired: Vec<(StoryId, SessionEndReason)> = stories
            .iter()
            .filter_map(|(id, story)| {
                if story.expires_at < now {
                    Some((id.clone(), SessionEndReason::Expired))
                } else if matches!(
                    story.state,
                    StoryState::InitiatorDisconnected { disconnect_at }
                        if now - disconnect_at > grace
                ) {
                    Some((id.clone(), SessionEndReason::InitiatorLeft))
                } else {
                    None
                }
            })
            .collect();

        for (id, reason) in &expired {
            info!("Removing expired story {} ({:?})", id, reason);
            stories.remove(id);
            counter!("storycollab_stories_expired_total").increment(1);
        }

        expired
    }

    /// Get count of active stories
    pub async fn story_count_async(&self) -> usize {
        let stories = self.stories.read().await;
        stories.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold one game event into the stored grid
fn fold_event(story: &mut Story, event: &GameEvent) -> Result<(), StoryError> {
    match event {
        GameEvent::NewGame(ids) => {
            // Length is validated at decode time
            for (cell, id) in story.grid.iter_mut().zip(ids) {
                *cell = *id;
            }
        }
        GameEvent::DotClick { slot, value } => {
            let cell = story
                .grid
                .get_mut(*slot)
                .ok_or(StoryError::BadSlotIndex(*slot))?;
            *cell = *value;
        }
    }
    Ok(())
}

/// Create a wire snapshot from a story record
fn create_story_snapshot(story: &Story) -> StorySnapshot {
    let initiator = story
        .participants
        .get(&story.initiator_id)
        .map(|p| p.to_participant())
        .unwrap_or_else(|| Participant {
            id: story.initiator_id,
            nick: "?".to_string(),
            colors: get_peer_colors(0),
            role: PeerRole::Initiator,
            connected_at: story.created_at,
        });

    let joiners: Vec<Participant> = story
        .participants
        .values()
        .filter(|p| p.role == PeerRole::Joiner)
        .map(|p| p.to_participant())
        .collect();

    StorySnapshot {
        id: story.id.clone(),
        rev: story.rev,
        dotlist: story.grid.to_vec(),
        mode: story.mode,
        initiator,
        joiners,
    }
}

/// Hash secrets using SHA256 for comparison
fn hash_secret(secret: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Verify secret against hash
fn verify_secret(secret: &str, hash: &str) -> bool {
    hash_secret(secret) == hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{GRID_SLOTS, UNSET};
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_story() {
        let manager = SessionManager::new();

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(story.id.len(), 10);
        assert!(!join_secret.is_empty());
        // The starting grid is drawn from the default picture set
        assert!(story.grid.iter().all(|&id| (0..36).contains(&id)));
    }

    #[tokio::test]
    async fn test_created_grid_drawn_from_configured_picture_set() {
        let config = StoryConfig {
            picture_count: 1,
            ..StoryConfig::default()
        };
        let manager = SessionManager::with_config(config);

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(story.grid, [0; GRID_SLOTS]);
    }

    #[tokio::test]
    async fn test_join_story() {
        let manager = SessionManager::new();

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let (snapshot, participant) = manager
            .join_story(&story.id, &join_secret, "Amiga")
            .await
            .unwrap();

        assert_eq!(snapshot.joiners.len(), 1);
        assert_eq!(participant.role, PeerRole::Joiner);
        assert_eq!(participant.nick, "Amiga");
    }

    #[tokio::test]
    async fn test_invalid_join_secret() {
        let manager = SessionManager::new();

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let result = manager.join_story(&story.id, "invalid", "Amiga").await;
        assert!(matches!(result, Err(StoryError::InvalidJoinSecret)));
    }

    #[tokio::test]
    async fn test_fourth_joiner_rejected() {
        let manager = SessionManager::new();

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        // Three joiners fill the story (four participants total)
        for i in 0..3 {
            manager
                .join_story(&story.id, &join_secret, &format!("peer-{i}"))
                .await
                .expect("joiner within the limit should be admitted");
        }

        let result = manager.join_story(&story.id, &join_secret, "peer-3").await;
        assert!(matches!(result, Err(StoryError::StoryFull(3))));
    }

    #[tokio::test]
    async fn test_apply_event_updates_snapshot_grid() {
        let manager = SessionManager::new();

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();
        let initial_rev = story.rev;

        let rev = manager
            .apply_event(&story.id, &GameEvent::NewGame(vec![3, 1, 4, 1, 5, 9, 2, 6, 5]))
            .await
            .unwrap();
        assert!(rev > initial_rev);

        manager
            .apply_event(&story.id, &GameEvent::DotClick { slot: 5, value: 7 })
            .await
            .unwrap();

        let snapshot = manager.get_story(&story.id).await.unwrap();
        assert_eq!(snapshot.dotlist, vec![3, 1, 4, 1, 5, 7, 2, 6, 5]);
    }

    #[tokio::test]
    async fn test_apply_event_bad_slot() {
        let manager = SessionManager::new();

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let result = manager
            .apply_event(&story.id, &GameEvent::DotClick { slot: 9, value: 0 })
            .await;
        assert!(matches!(result, Err(StoryError::BadSlotIndex(9))));
    }

    #[tokio::test]
    async fn test_initiator_leave_starts_grace_period() {
        let manager = SessionManager::new();

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();
        let (_, joiner) = manager
            .join_story(&story.id, &join_secret, "Amiga")
            .await
            .unwrap();

        let was_initiator = manager
            .remove_participant(&story.id, joiner.id)
            .await
            .unwrap();
        assert!(!was_initiator);

        let was_initiator = manager
            .remove_participant(&story.id, story.initiator_id)
            .await
            .unwrap();
        assert!(was_initiator);
    }

    #[tokio::test]
    async fn test_cleanup_expired_stories() {
        let config = StoryConfig {
            max_duration: Duration::from_millis(1),
            initiator_grace_period: Duration::from_secs(1),
            ..StoryConfig::default()
        };
        let manager = SessionManager::with_config(config);

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let ended = manager.cleanup_expired().await;

        assert_eq!(ended, vec![(story.id, SessionEndReason::Expired)]);
        assert_eq!(manager.story_count_async().await, 0);
    }

    #[tokio::test]
    async fn test_grace_expiry_reports_initiator_left() {
        let config = StoryConfig {
            initiator_grace_period: Duration::from_millis(1),
            ..StoryConfig::default()
        };
        let manager = SessionManager::with_config(config);

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();
        manager
            .join_story(&story.id, &join_secret, "Amiga")
            .await
            .unwrap();
        manager
            .remove_participant(&story.id, story.initiator_id)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let ended = manager.cleanup_expired().await;

        assert_eq!(ended, vec![(story.id, SessionEndReason::InitiatorLeft)]);
    }

    #[tokio::test]
    async fn test_remove_unknown_participant_is_rejected() {
        let manager = SessionManager::new();

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();
        let rev_before = manager.get_story(&story.id).await.unwrap().rev;

        let result = manager
            .remove_participant(&story.id, Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(StoryError::ParticipantNotFound(_))));
        assert_eq!(manager.get_story(&story.id).await.unwrap().rev, rev_before);
    }

    #[tokio::test]
    async fn test_relay_delivery_order_matches_fold_order() {
        let manager = Arc::new(SessionManager::new());

        let (story, _) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel::<ServerMessage>(512);

        // Two peers click away at the same slots concurrently
        let mut tasks = Vec::new();
        for worker in 0..2i64 {
            let manager = Arc::clone(&manager);
            let story_id = story.id.clone();
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50usize {
                    let event = GameEvent::DotClick {
                        slot: i % GRID_SLOTS,
                        value: worker * 100 + i as i64,
                    };
                    let msg = ServerMessage::Event {
                        raw: event.to_wire().unwrap(),
                        from: Uuid::new_v4(),
                    };
                    manager
                        .relay_event(&story_id, &event, &msg, std::slice::from_ref(&tx))
                        .await
                        .unwrap();
                }
            }));
        }
        drop(tx);
        for task in tasks {
            task.await.unwrap();
        }

        // Replaying the relayed events in delivery order must land exactly
        // on the stored grid, whatever the interleaving was
        let mut grid = [UNSET; GRID_SLOTS];
        while let Some(msg) = rx.recv().await {
            if let ServerMessage::Event { raw, .. } = msg
                && let GameEvent::DotClick { slot, value } = GameEvent::from_wire(&raw).unwrap()
            {
                grid[slot] = value;
            }
        }
        let snapshot = manager.get_story(&story.id).await.unwrap();
        assert_eq!(snapshot.dotlist, grid.to_vec());
    }

    #[tokio::test]
    async fn test_joiner_colors_cycle_through_palette() {
        let manager = SessionManager::new();

        let (story, join_secret) = manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let snapshot = manager.get_story(&story.id).await.unwrap();
        assert_eq!(snapshot.initiator.colors.stroke, "#A0FFA0");

        let (_, first_joiner) = manager
            .join_story(&story.id, &join_secret, "Amiga")
            .await
            .unwrap();
        assert_eq!(first_joiner.colors.stroke, "#8080FF");
    }
}

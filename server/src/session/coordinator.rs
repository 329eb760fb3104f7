//! Peer-side session coordination.
//!
//! [`SessionCoordinator`] owns the grid and the lifecycle of the
//! collaboration channel. Local actions mutate the grid then broadcast
//! the equivalent event; received events mutate the grid and broadcast
//! nothing, so two coordinators exchanging events converge without echo
//! loops. Sharing and joining run through the same state machine,
//! differing only in the [`Role`] carried by the link.

use crate::game::state::{GRID_SLOTS, GameError, GameState, ViewMode};
use crate::protocol::GameEvent;
use crate::session::dispatch;
use tracing::{debug, trace, warn};

/// Outbound half of the collaboration channel ("tube").
///
/// Production hands serialized events to the WebSocket relay plumbing;
/// tests hand them to in-memory channels.
pub trait EventTube {
    fn send(&mut self, raw: String);
}

/// This peer's role in a shared story. Exactly one initiator per session:
/// only its `new_game` decides the image set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Joiner,
}

/// Collaboration link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session; local actions never emit events
    Unshared,
    /// Marked shared or joined; waiting for the channel to come up
    Negotiating(Role),
    /// Bidirectional channel established
    Connected(Role),
    /// Channel lost or closed; back to single-player, no reconnect
    Disconnected,
}

pub struct SessionCoordinator<T: EventTube> {
    game: GameState,
    link: LinkState,
    tube: Option<T>,
}

impl<T: EventTube> SessionCoordinator<T> {
    pub fn new(game: GameState) -> Self {
        Self {
            game,
            link: LinkState::Unshared,
            tube: None,
        }
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    /// Direct grid access for UI concerns that are never broadcast
    /// (captions, audio flags). Shared mutations go through
    /// [`SessionCoordinator::new_game`] and [`SessionCoordinator::click`].
    pub fn game_mut(&mut self) -> &mut GameState {
        &mut self.game
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn role(&self) -> Option<Role> {
        match self.link {
            LinkState::Negotiating(role) | LinkState::Connected(role) => Some(role),
            LinkState::Unshared | LinkState::Disconnected => None,
        }
    }

    /// This activity was marked shared: we will initiate
    pub fn begin_sharing(&mut self) {
        debug!("sharing the story: awaiting channel");
        self.link = LinkState::Negotiating(Role::Initiator);
    }

    /// We are joining someone else's story
    pub fn begin_joining(&mut self) {
        debug!("joining a story: awaiting channel");
        self.link = LinkState::Negotiating(Role::Joiner);
    }

    /// The collaboration substrate brought the channel up
    pub fn tube_ready(&mut self, tube: T) {
        match self.link {
            LinkState::Negotiating(role) => {
                debug!(?role, "collaboration channel established");
                self.link = LinkState::Connected(role);
                self.tube = Some(tube);
            }
            state => {
                warn!(?state, "ignoring tube in unexpected link state");
            }
        }
    }

    /// The channel went away. Local play continues single-player; no
    /// reconnect is attempted and nothing is emitted from here on.
    pub fn disconnect(&mut self) {
        if self.link != LinkState::Unshared {
            debug!("collaboration channel closed");
            self.link = LinkState::Disconnected;
        }
        self.tube = None;
    }

    /// Start a new game locally. Only a connected initiator broadcasts the
    /// chosen image set; a joiner's shuffle stays local.
    pub fn new_game(&mut self, ids: [u32; GRID_SLOTS]) {
        self.game.new_game(ids);
        if self.link == LinkState::Connected(Role::Initiator) {
            debug!("sending a new game");
            self.emit(GameEvent::NewGame(self.game.save().to_vec()));
        }
    }

    /// Click a slot locally. Any connected peer broadcasts its clicks.
    pub fn click(&mut self, slot: usize, value: i64) -> Result<(), GameError> {
        self.game.set_slot(slot, value)?;
        if matches!(self.link, LinkState::Connected(_)) {
            self.emit(GameEvent::DotClick { slot, value });
        }
        Ok(())
    }

    /// A raw message arrived from a peer. Parse failures are logged and
    /// dropped; a successfully decoded event is applied exactly once and
    /// never re-broadcast.
    pub fn on_message(&mut self, raw: &str) {
        let event = match GameEvent::from_wire(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "dropping undecodable event");
                return;
            }
        };
        trace!(event = event.name(), "applying remote event");
        if let Err(err) = dispatch::apply(&mut self.game, &event) {
            warn!(%err, "dropping inapplicable event");
        }
    }

    /// A peer joined the story: the initiator re-broadcasts the current
    /// grid so late joiners converge.
    pub fn on_peer_joined(&mut self) {
        if self.link == LinkState::Connected(Role::Initiator) {
            debug!("sending grid to late joiner");
            self.emit(GameEvent::NewGame(self.game.save().to_vec()));
        }
    }

    // UI-facing passthroughs

    pub fn set_mode(&mut self, mode: ViewMode) {
        self.game.set_mode(mode);
    }

    pub fn save(&self) -> [i64; GRID_SLOTS] {
        self.game.save()
    }

    pub fn restore(&mut self, ids: &[i64]) -> Result<(), GameError> {
        self.game.restore(ids)
    }

    pub fn current(&self) -> usize {
        self.game.current()
    }

    pub fn set_current(&mut self, index: usize) -> Result<(), GameError> {
        self.game.set_current(index)
    }

    fn emit(&mut self, event: GameEvent) {
        if !matches!(self.link, LinkState::Connected(_)) {
            trace!(event = event.name(), "no active session, dropping event");
            return;
        }
        let raw = match event.to_wire() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "failed to serialize event");
                return;
            }
        };
        match self.tube.as_mut() {
            Some(tube) => tube.send(raw),
            None => trace!("connected without a tube, dropping event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Tube that records everything sent through it
    #[derive(Clone, Default)]
    struct RecordingTube {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl EventTube for RecordingTube {
        fn send(&mut self, raw: String) {
            self.sent.lock().unwrap().push(raw);
        }
    }

    impl RecordingTube {
        fn drain(&self) -> Vec<String> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    fn connected(role: Role) -> (SessionCoordinator<RecordingTube>, RecordingTube) {
        let tube = RecordingTube::default();
        let mut coordinator = SessionCoordinator::new(GameState::new());
        match role {
            Role::Initiator => coordinator.begin_sharing(),
            Role::Joiner => coordinator.begin_joining(),
        }
        coordinator.tube_ready(tube.clone());
        (coordinator, tube)
    }

    #[test]
    fn test_initiator_new_game_broadcasts() {
        let (mut coordinator, tube) = connected(Role::Initiator);

        coordinator.new_game([3, 1, 4, 1, 5, 9, 2, 6, 5]);

        let sent = tube.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            GameEvent::from_wire(&sent[0]).unwrap(),
            GameEvent::NewGame(vec![3, 1, 4, 1, 5, 9, 2, 6, 5])
        );
    }

    #[test]
    fn test_joiner_new_game_stays_local() {
        let (mut coordinator, tube) = connected(Role::Joiner);

        coordinator.new_game([1; GRID_SLOTS]);

        assert!(tube.drain().is_empty());
        assert_eq!(coordinator.save(), [1; GRID_SLOTS]);
    }

    #[test]
    fn test_any_connected_peer_broadcasts_clicks() {
        for role in [Role::Initiator, Role::Joiner] {
            let (mut coordinator, tube) = connected(role);
            coordinator.new_game([0; GRID_SLOTS]);
            tube.drain();

            coordinator.click(5, 12).unwrap();

            let sent = tube.drain();
            assert_eq!(sent.len(), 1, "role {role:?} should broadcast clicks");
            assert_eq!(
                GameEvent::from_wire(&sent[0]).unwrap(),
                GameEvent::DotClick { slot: 5, value: 12 }
            );
        }
    }

    #[test]
    fn test_unshared_actions_never_emit() {
        let mut coordinator: SessionCoordinator<RecordingTube> =
            SessionCoordinator::new(GameState::new());

        coordinator.new_game([2; GRID_SLOTS]);
        coordinator.click(0, 5).unwrap();

        assert_eq!(coordinator.link(), LinkState::Unshared);
        assert_eq!(coordinator.save()[0], 5);
    }

    #[test]
    fn test_disconnected_degrades_to_single_player() {
        let (mut coordinator, tube) = connected(Role::Initiator);
        coordinator.new_game([0; GRID_SLOTS]);
        tube.drain();

        coordinator.disconnect();
        coordinator.new_game([4; GRID_SLOTS]);
        coordinator.click(2, 8).unwrap();

        assert!(tube.drain().is_empty());
        assert_eq!(coordinator.link(), LinkState::Disconnected);
        assert_eq!(coordinator.save()[2], 8);
    }

    #[test]
    fn test_received_event_is_applied_without_echo() {
        let (mut coordinator, tube) = connected(Role::Joiner);

        let event = GameEvent::DotClick { slot: 5, value: 3 };
        coordinator.on_message(&event.to_wire().unwrap());

        assert_eq!(coordinator.save()[5], 3);
        assert!(tube.drain().is_empty(), "remote events must not re-emit");
    }

    #[test]
    fn test_malformed_message_is_dropped() {
        let (mut coordinator, tube) = connected(Role::Joiner);
        coordinator.new_game([6; GRID_SLOTS]);
        let before = coordinator.save();

        coordinator.on_message("not an event");
        coordinator.on_message(r#"{"command":"z","payload":"[]"}"#);
        coordinator.on_message(r#"{"command":"p","payload":"[99,0]"}"#);

        assert_eq!(coordinator.save(), before);
        assert!(tube.drain().is_empty());
    }

    #[test]
    fn test_initiator_reshares_grid_on_peer_join() {
        let (mut coordinator, tube) = connected(Role::Initiator);
        coordinator.new_game([3, 1, 4, 1, 5, 9, 2, 6, 5]);
        tube.drain();

        coordinator.on_peer_joined();

        let sent = tube.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            GameEvent::from_wire(&sent[0]).unwrap(),
            GameEvent::NewGame(vec![3, 1, 4, 1, 5, 9, 2, 6, 5])
        );
    }

    #[test]
    fn test_joiner_does_not_reshare_on_peer_join() {
        let (mut coordinator, tube) = connected(Role::Joiner);
        coordinator.on_peer_joined();
        assert!(tube.drain().is_empty());
    }

    #[test]
    fn test_tube_in_wrong_state_is_ignored() {
        let mut coordinator = SessionCoordinator::new(GameState::new());
        coordinator.tube_ready(RecordingTube::default());
        assert_eq!(coordinator.link(), LinkState::Unshared);
    }

    #[test]
    fn test_replaying_emitted_events_converges() {
        let (mut sharer, tube) = connected(Role::Initiator);

        sharer.new_game([3, 1, 4, 1, 5, 9, 2, 6, 5]);
        sharer.click(0, 7).unwrap();
        sharer.click(8, -1).unwrap();
        sharer.click(0, 2).unwrap();

        let (mut peer, _peer_tube) = connected(Role::Joiner);
        for raw in tube.drain() {
            peer.on_message(&raw);
        }

        assert_eq!(peer.save(), sharer.save());
        assert_eq!(peer.game(), sharer.game());
    }
}

use crate::protocol::{
    AckStatus, ClientMessage, ErrorCode, GameEvent, ServerMessage, SessionEndReason,
};
use crate::session::manager::{SessionManager, StoryError};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state for a single peer
pub struct Connection {
    pub id: Uuid,
    pub story_id: Option<String>,
    pub participant_id: Option<Uuid>,
    pub last_ping: Instant,
    pub sender: mpsc::Sender<ServerMessage>,
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionRegistry,
    pub session_manager: Arc<SessionManager>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            session_manager: Arc::new(SessionManager::new()),
        }
    }

    pub fn with_session_manager(mut self, session_manager: Arc<SessionManager>) -> Self {
        self.session_manager = session_manager;
        self
    }

    /// (active stories, open connections)
    pub async fn get_stats(&self) -> (usize, usize) {
        let connections = self.connections.read().await.len();
        let stories = self.session_manager.story_count_async().await;
        (stories, connections)
    }

    /// Remove overdue stories and tell their remaining peers the session
    /// has ended, detaching them so later events get a clean rejection
    /// instead of a dangling story reference.
    pub async fn reap_expired_stories(&self) {
        let ended = self.session_manager.cleanup_expired().await;
        if ended.is_empty() {
            return;
        }

        let mut connections = self.connections.write().await;
        for (story_id, reason) in ended {
            for conn in connections.values_mut() {
                if conn.story_id.as_deref() == Some(story_id.as_str()) {
                    conn.story_id = None;
                    conn.participant_id = None;
                    let _ = conn
                        .sender
                        .send(ServerMessage::SessionEnded { reason })
                        .await;
                }
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for WebSocket connections
pub struct WsConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("New WebSocket connection: {}", connection_id);

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    // Register connection
    {
        let mut connections = state.connections.write().await;
        connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                story_id: None,
                participant_id: None,
                last_ping: Instant::now(),
                sender: tx.clone(),
            },
        );
    }

    // Split socket into sender and receiver
    use futures_util::StreamExt;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Spawn task to forward outgoing messages to WebSocket
    let send_task = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    // Spawn ping task
    let ping_tx = tx.clone();
    let ping_state = state.clone();
    let ping_connection_id = connection_id;
    let ping_task = tokio::spawn(async move {
        let config = WsConfig::default();
        let mut interval = tokio::time::interval(config.ping_interval);

        loop {
            interval.tick().await;

            // Check if connection is still alive
            let should_close = {
                let connections = ping_state.connections.read().await;
                if let Some(conn) = connections.get(&ping_connection_id) {
                    conn.last_ping.elapsed() > config.ping_timeout + config.ping_interval
                } else {
                    true
                }
            };

            if should_close {
                debug!("Connection {} timed out", ping_connection_id);
                break;
            }

            if ping_tx.send(ServerMessage::Pong).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(msg) => {
                match msg {
                    Message::Text(text) => {
                        // Update last ping time
                        {
                            let mut connections = state.connections.write().await;
                            if let Some(conn) = connections.get_mut(&connection_id) {
                                conn.last_ping = Instant::now();
                            }
                        }

                        // Parse and handle message
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(client_msg, connection_id, &state, &tx).await;
                            }
                            Err(e) => {
                                warn!("Failed to parse client message: {}", e);
                                let _ = tx
                                    .send(ServerMessage::SessionError {
                                        code: ErrorCode::InvalidMessage,
                                        message: format!("Invalid message format: {}", e),
                                    })
                                    .await;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        debug!("Ignoring binary message from {}", connection_id);
                    }
                    Message::Ping(data) => {
                        // Handled by axum automatically with pong
                        debug!("Received ping: {:?}", data);
                    }
                    Message::Pong(_) => {
                        let mut connections = state.connections.write().await;
                        if let Some(conn) = connections.get_mut(&connection_id) {
                            conn.last_ping = Instant::now();
                        }
                    }
                    Message::Close(_) => {
                        info!("Client {} requested close", connection_id);
                        break;
                    }
                }
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Cleanup
    ping_task.abort();
    send_task.abort();

    leave_story(connection_id, &state).await;

    // Remove from registry
    {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
    }

    info!("WebSocket connection closed: {}", connection_id);
}

/// Handle a parsed client message
async fn handle_client_message(
    msg: ClientMessage,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) {
    match msg {
        ClientMessage::Ping { seq } => {
            let _ = tx.send(ServerMessage::Pong).await;
            let _ = tx
                .send(ServerMessage::Ack {
                    ack_seq: seq,
                    status: AckStatus::Ok,
                    reason: None,
                })
                .await;
        }
        ClientMessage::CreateStory { nick, seq } => {
            match state.session_manager.create_story(&nick, connection_id).await {
                Ok((story, join_secret)) => {
                    {
                        let mut connections = state.connections.write().await;
                        if let Some(conn) = connections.get_mut(&connection_id) {
                            conn.story_id = Some(story.id.clone());
                            conn.participant_id = Some(story.initiator_id);
                        }
                    }
                    match state.session_manager.get_story(&story.id).await {
                        Ok(snapshot) => {
                            let _ = tx
                                .send(ServerMessage::StoryCreated {
                                    story: snapshot,
                                    join_secret,
                                })
                                .await;
                            let _ = tx
                                .send(ServerMessage::Ack {
                                    ack_seq: seq,
                                    status: AckStatus::Ok,
                                    reason: None,
                                })
                                .await;
                        }
                        Err(e) => {
                            reject(tx, seq, ErrorCode::StoryNotFound, &e.to_string()).await;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to create story for {}: {}", connection_id, e);
                    reject(tx, seq, error_code(&e), &e.to_string()).await;
                }
            }
        }
        ClientMessage::JoinStory {
            story_id,
            join_secret,
            nick,
            seq,
        } => {
            match state
                .session_manager
                .join_story(&story_id, &join_secret, &nick)
                .await
            {
                Ok((snapshot, you)) => {
                    {
                        let mut connections = state.connections.write().await;
                        if let Some(conn) = connections.get_mut(&connection_id) {
                            conn.story_id = Some(story_id.clone());
                            conn.participant_id = Some(you.id);
                        }
                    }
                    let _ = tx
                        .send(ServerMessage::StoryJoined {
                            story: snapshot,
                            you: you.clone(),
                        })
                        .await;
                    let _ = tx
                        .send(ServerMessage::Ack {
                            ack_seq: seq,
                            status: AckStatus::Ok,
                            reason: None,
                        })
                        .await;
                    // Tell the other peers, so the initiator re-shares its grid
                    broadcast_to_story(
                        state,
                        &story_id,
                        connection_id,
                        ServerMessage::ParticipantJoined { participant: you },
                    )
                    .await;
                }
                Err(e) => {
                    debug!("Join of story {} failed for {}: {}", story_id, connection_id, e);
                    reject(tx, seq, error_code(&e), &e.to_string()).await;
                }
            }
        }
        ClientMessage::Event { raw, seq } => {
            let (story_id, participant_id) = {
                let connections = state.connections.read().await;
                match connections.get(&connection_id) {
                    Some(conn) => (conn.story_id.clone(), conn.participant_id),
                    None => (None, None),
                }
            };
            let (Some(story_id), Some(participant_id)) = (story_id, participant_id) else {
                reject(tx, seq, ErrorCode::NotInStory, "Not in a story").await;
                return;
            };

            // Validate before relaying; malformed events are dropped here
            // and never reach the other peers
            let event = match GameEvent::from_wire(&raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping undecodable event from {}: {}", connection_id, e);
                    reject(tx, seq, ErrorCode::InvalidMessage, &e.to_string()).await;
                    return;
                }
            };

            // The other peers are collected first; the event is folded into
            // the stored grid and handed to them inside one lock scope, so
            // concurrent events from different connections cannot reach the
            // peers in a different order than they reached the grid
            let peers: Vec<mpsc::Sender<ServerMessage>> = {
                let connections = state.connections.read().await;
                connections
                    .values()
                    .filter(|conn| {
                        conn.id != connection_id
                            && conn.story_id.as_deref() == Some(story_id.as_str())
                    })
                    .map(|conn| conn.sender.clone())
                    .collect()
            };
            let msg = ServerMessage::Event {
                raw,
                from: participant_id,
            };
            if let Err(e) = state
                .session_manager
                .relay_event(&story_id, &event, &msg, &peers)
                .await
            {
                warn!("Dropping inapplicable event from {}: {}", connection_id, e);
                reject(tx, seq, ErrorCode::InvalidMessage, &e.to_string()).await;
                return;
            }

            let _ = tx
                .send(ServerMessage::Ack {
                    ack_seq: seq,
                    status: AckStatus::Ok,
                    reason: None,
                })
                .await;
        }
        ClientMessage::LeaveStory { seq } => {
            leave_story(connection_id, state).await;
            let _ = tx
                .send(ServerMessage::Ack {
                    ack_seq: seq,
                    status: AckStatus::Ok,
                    reason: None,
                })
                .await;
        }
    }
}

/// Detach a connection from its story, if any, and tell the other peers
async fn leave_story(connection_id: Uuid, state: &AppState) {
    let (story_id, participant_id) = {
        let mut connections = state.connections.write().await;
        match connections.get_mut(&connection_id) {
            Some(conn) => (conn.story_id.take(), conn.participant_id.take()),
            None => (None, None),
        }
    };
    let (Some(story_id), Some(participant_id)) = (story_id, participant_id) else {
        return;
    };

    match state
        .session_manager
        .remove_participant(&story_id, participant_id)
        .await
    {
        Ok(_was_initiator) => {
            // The session degrades silently for the remaining peers; the
            // cleanup task expires the story if the initiator stays away
            broadcast_to_story(
                state,
                &story_id,
                connection_id,
                ServerMessage::ParticipantLeft { participant_id },
            )
            .await;
        }
        Err(e) => {
            debug!("Leave of story {} by {} failed: {}", story_id, connection_id, e);
        }
    }
}

/// Send a message to every other peer of a story, in order
async fn broadcast_to_story(
    state: &AppState,
    story_id: &str,
    exclude_connection: Uuid,
    msg: ServerMessage,
) {
    let connections = state.connections.read().await;
    for conn in connections.values() {
        if conn.id == exclude_connection {
            continue;
        }
        if conn.story_id.as_deref() == Some(story_id) {
            let _ = conn.sender.send(msg.clone()).await;
        }
    }
}

async fn reject(tx: &mpsc::Sender<ServerMessage>, seq: u64, code: ErrorCode, message: &str) {
    let _ = tx
        .send(ServerMessage::SessionError {
            code,
            message: message.to_string(),
        })
        .await;
    let _ = tx
        .send(ServerMessage::Ack {
            ack_seq: seq,
            status: AckStatus::Rejected,
            reason: Some(message.to_string()),
        })
        .await;
}

fn error_code(err: &StoryError) -> ErrorCode {
    match err {
        StoryError::NotFound(_) => ErrorCode::StoryNotFound,
        StoryError::StoryFull(_) => ErrorCode::StoryFull,
        StoryError::StoryExpired => ErrorCode::StoryExpired,
        StoryError::InvalidJoinSecret => ErrorCode::InvalidJoinSecret,
        StoryError::ParticipantNotFound(_) | StoryError::BadSlotIndex(_) => {
            ErrorCode::InvalidMessage
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_wire_codes() {
        assert_eq!(
            error_code(&StoryError::NotFound("x".to_string())),
            ErrorCode::StoryNotFound
        );
        assert_eq!(error_code(&StoryError::StoryFull(3)), ErrorCode::StoryFull);
        assert_eq!(
            error_code(&StoryError::InvalidJoinSecret),
            ErrorCode::InvalidJoinSecret
        );
    }

    #[tokio::test]
    async fn test_app_state_stats_start_empty() {
        let state = AppState::new();
        assert_eq!(state.get_stats().await, (0, 0));
    }

    #[tokio::test]
    async fn test_reap_tells_peers_the_session_ended() {
        use crate::session::state::StoryConfig;

        let config = StoryConfig {
            max_duration: Duration::from_millis(1),
            ..StoryConfig::default()
        };
        let state =
            AppState::new().with_session_manager(Arc::new(SessionManager::with_config(config)));

        let (story, _) = state
            .session_manager
            .create_story("Walter", Uuid::new_v4())
            .await
            .unwrap();

        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        {
            let mut connections = state.connections.write().await;
            connections.insert(
                conn_id,
                Connection {
                    id: conn_id,
                    story_id: Some(story.id.clone()),
                    participant_id: Some(story.initiator_id),
                    last_ping: Instant::now(),
                    sender: tx,
                },
            );
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        state.reap_expired_stories().await;

        match rx.try_recv() {
            Ok(ServerMessage::SessionEnded { reason }) => {
                assert_eq!(reason, SessionEndReason::Expired);
            }
            other => panic!("expected a session end notice, got {other:?}"),
        }

        // The connection is detached from the removed story
        let connections = state.connections.read().await;
        let conn = connections.get(&conn_id).unwrap();
        assert!(conn.story_id.is_none());
        assert!(conn.participant_id.is_none());
    }
}

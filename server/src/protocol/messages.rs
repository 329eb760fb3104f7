use crate::game::state::ViewMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client to Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Share a new story session (the sender becomes its initiator)
    CreateStory { nick: String, seq: u64 },
    /// Join an existing story session
    JoinStory {
        story_id: String,
        join_secret: String,
        nick: String,
        seq: u64,
    },
    /// A game event to relay to the other peers, carried opaquely
    Event { raw: String, seq: u64 },
    /// Leave the current story session
    LeaveStory { seq: u64 },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// Server to Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Story was created successfully (includes the join secret to share)
    StoryCreated {
        story: StorySnapshot,
        join_secret: String,
    },
    /// Successfully joined a story
    StoryJoined {
        story: StorySnapshot,
        you: Participant,
    },
    /// A game event from another peer, relayed verbatim
    Event { raw: String, from: Uuid },
    /// Acknowledgment of client action
    Ack {
        ack_seq: u64,
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Session error
    SessionError { code: ErrorCode, message: String },
    /// The story session has ended
    SessionEnded { reason: SessionEndReason },
    /// A peer joined the story
    ParticipantJoined { participant: Participant },
    /// A peer left the story
    ParticipantLeft { participant_id: Uuid },
    /// Pong response (to client's Ping)
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    StoryNotFound,
    StoryFull,
    StoryExpired,
    InvalidJoinSecret,
    InvalidMessage,
    NotInStory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Expired,
    InitiatorLeft,
}

/// Story snapshot for state transfer to (late) joiners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorySnapshot {
    pub id: String,
    pub rev: u64,
    /// Latest grid images as play has left them (`-1` = unset slot)
    pub dotlist: Vec<i64>,
    pub mode: ViewMode,
    pub initiator: Participant,
    pub joiners: Vec<Participant>,
}

/// Peer info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub nick: String,
    pub colors: XoColors,
    pub role: PeerRole,
    pub connected_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Initiator,
    Joiner,
}

/// Sugar buddy color pair (stroke and fill)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct XoColors {
    pub stroke: String,
    pub fill: String,
}

impl ClientMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::CreateStory { .. } => "create_story",
            ClientMessage::JoinStory { .. } => "join_story",
            ClientMessage::Event { .. } => "event",
            ClientMessage::LeaveStory { .. } => "leave_story",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

impl ServerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::StoryCreated { .. } => "story_created",
            ServerMessage::StoryJoined { .. } => "story_joined",
            ServerMessage::Event { .. } => "event",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::SessionError { .. } => "session_error",
            ServerMessage::SessionEnded { .. } => "session_ended",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::ParticipantLeft { .. } => "participant_left",
            ServerMessage::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tagging() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"join_story","story_id":"abcdefg234","join_secret":"s","nick":"Walter","seq":3}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::JoinStory { ref story_id, seq: 3, .. } if story_id == "abcdefg234"
        ));
        assert_eq!(msg.message_type(), "join_story");
    }

    #[test]
    fn test_event_relays_opaque_string() {
        let raw = r#"{"command":"p","payload":"[5,2]"}"#;
        let msg = ClientMessage::Event {
            raw: raw.to_string(),
            seq: 1,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::Event { raw: r, .. } => assert_eq!(r, raw),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ViewMode::Array).unwrap(), "\"array\"");
        assert_eq!(
            serde_json::to_string(&ViewMode::Linear).unwrap(),
            "\"linear\""
        );
    }
}

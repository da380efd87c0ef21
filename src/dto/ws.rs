//! Wire envelopes exchanged with game clients over the WebSocket.

use std::fmt;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{
        common::{PlayerSummary, PublicGameView},
        now_ms,
    },
    error::ProtocolError,
    state::state_machine::GamePhase,
};

/// Inbound message types understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// Client-initiated liveness check.
    Ping,
    /// Reply to a server liveness probe.
    Pong,
    /// Enter a room.
    Join,
    /// Leave the current room, keeping the connection open.
    Leave,
    /// Flip lobby readiness.
    ToggleReady,
    /// Start a round without waiting for everyone to be ready.
    StartGame,
    /// Discussion chat line.
    Chat,
    /// Ballot against a suspected imposter.
    Vote,
    /// Answer to the round's prompt.
    SubmitAnswer,
    /// Leave the results screen for a new lobby.
    NewGame,
    /// Admin/debug jump to an arbitrary phase.
    ForcePhaseTransition,
}

impl InboundKind {
    /// Every inbound kind.
    pub const ALL: [InboundKind; 11] = [
        InboundKind::Ping,
        InboundKind::Pong,
        InboundKind::Join,
        InboundKind::Leave,
        InboundKind::ToggleReady,
        InboundKind::StartGame,
        InboundKind::Chat,
        InboundKind::Vote,
        InboundKind::SubmitAnswer,
        InboundKind::NewGame,
        InboundKind::ForcePhaseTransition,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            InboundKind::Ping => "ping",
            InboundKind::Pong => "pong",
            InboundKind::Join => "join",
            InboundKind::Leave => "leave",
            InboundKind::ToggleReady => "toggle_ready",
            InboundKind::StartGame => "start_game",
            InboundKind::Chat => "chat",
            InboundKind::Vote => "vote",
            InboundKind::SubmitAnswer => "submit_answer",
            InboundKind::NewGame => "new_game",
            InboundKind::ForcePhaseTransition => "force_phase_transition",
        }
    }

    /// Resolve a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `join`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    /// Display name.
    pub player_name: String,
    /// Three-digit room code.
    pub room_code: String,
    /// Identity to resume, if the client has one.
    #[serde(default)]
    pub player_id: Option<String>,
}

/// Payload of `chat`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatPayload {
    /// Chat text.
    pub message: String,
}

/// Payload of `vote`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    /// Player voted against.
    pub target_id: String,
}

/// Payload of `submit_answer`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AnswerPayload {
    /// Answer text.
    pub answer: String,
}

/// Payload of `force_phase_transition`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForcePhasePayload {
    /// Target phase.
    pub phase: GamePhase,
}

/// Typed inbound message, produced once the envelope passed validation.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// See [`InboundKind::Ping`].
    Ping,
    /// See [`InboundKind::Pong`].
    Pong,
    /// See [`InboundKind::Join`].
    Join(JoinPayload),
    /// See [`InboundKind::Leave`].
    Leave,
    /// See [`InboundKind::ToggleReady`].
    ToggleReady,
    /// See [`InboundKind::StartGame`].
    StartGame,
    /// See [`InboundKind::Chat`].
    Chat(ChatPayload),
    /// See [`InboundKind::Vote`].
    Vote(VotePayload),
    /// See [`InboundKind::SubmitAnswer`].
    SubmitAnswer(AnswerPayload),
    /// See [`InboundKind::NewGame`].
    NewGame,
    /// See [`InboundKind::ForcePhaseTransition`].
    ForcePhaseTransition(ForcePhasePayload),
}

impl InboundMessage {
    /// Build the typed message for `kind` from an already validated payload.
    pub fn decode(kind: InboundKind, payload: Map<String, Value>) -> Result<Self, ProtocolError> {
        let message = match kind {
            InboundKind::Ping => Self::Ping,
            InboundKind::Pong => Self::Pong,
            InboundKind::Join => Self::Join(typed(payload)?),
            InboundKind::Leave => Self::Leave,
            InboundKind::ToggleReady => Self::ToggleReady,
            InboundKind::StartGame => Self::StartGame,
            InboundKind::Chat => Self::Chat(typed(payload)?),
            InboundKind::Vote => Self::Vote(typed(payload)?),
            InboundKind::SubmitAnswer => Self::SubmitAnswer(typed(payload)?),
            InboundKind::NewGame => Self::NewGame,
            InboundKind::ForcePhaseTransition => Self::ForcePhaseTransition(
                typed(payload).map_err(|_| ProtocolError::schema("phase", "unknown phase"))?,
            ),
        };
        Ok(message)
    }
}

fn typed<T: DeserializeOwned>(payload: Map<String, Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(payload))
        .map_err(|err| ProtocolError::schema("payload", err.to_string()))
}

/// Sent to a fresh connection before anything else.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished {
    /// Identifier of the connection.
    pub connection_id: Uuid,
    /// Server clock in epoch milliseconds.
    pub server_time: u64,
}

/// Sent to a connection after a successful `join`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinSuccess {
    /// Identity to present on reconnect.
    pub player_id: String,
    /// Display name as stored.
    pub player_name: String,
    /// Joined room.
    pub room_code: String,
    /// Whether the player hosts the room.
    pub is_host: bool,
    /// Public view of the room's session.
    pub game_state: PublicGameView,
}

/// Sent to a connection after `leave`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeftRoom {
    /// Room that was left.
    pub room_code: String,
}

/// Error reported to the originating connection only.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorPayload {
    /// Human readable reason.
    pub message: String,
    /// Stable machine-readable code.
    pub code: String,
}

/// Room roster broadcast after any membership or readiness change.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerListUpdate {
    /// Active players in join order.
    pub players: Vec<PlayerSummary>,
    /// Number of active players.
    pub total_players: usize,
    /// Room the roster belongs to.
    pub room_code: String,
}

/// Broadcast after every phase transition.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChange {
    /// Phase entered.
    pub phase: GamePhase,
    /// Phase left.
    pub previous_phase: GamePhase,
    /// Public view after the transition.
    pub game_state: PublicGameView,
}

/// Periodic countdown during discussion.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionTimer {
    /// Whole seconds left, rounded up.
    pub time_remaining: u64,
    /// Deadline in epoch milliseconds.
    pub discussion_ends_at: u64,
}

/// Ballot counters; individual votes are never disclosed.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteProgress {
    /// Ballots received so far.
    pub votes_received: usize,
    /// Active players expected to vote.
    pub total_players: usize,
    /// Whether everyone voted.
    pub all_votes_received: bool,
}

/// Answer counters during the question phase.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerProgress {
    /// Answers received so far.
    pub answers_received: usize,
    /// Active players expected to answer.
    pub total_players: usize,
}

/// Private per-player round assignment sent when a question starts.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Prompt drawn for the round.
    pub question_id: u32,
    /// Whether the receiving player is the imposter this round.
    pub is_imposter: bool,
}

/// Chat line fanned out to a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    /// Message id.
    pub id: Uuid,
    /// Author.
    pub player_id: String,
    /// Author display name.
    pub player_name: String,
    /// Text.
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// Announced when everybody is ready and a round is about to start.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameStarting {
    /// Human readable announcement.
    pub message: String,
    /// Seconds until the question appears.
    pub countdown: u64,
}

/// Empty object payload.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct EmptyPayload {}

/// Outbound message catalog.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// First frame on every connection.
    ConnectionEstablished(ConnectionEstablished),
    /// Reply to `join`.
    JoinSuccess(JoinSuccess),
    /// Reply to `leave`.
    LeftRoom(LeftRoom),
    /// Any rejected request.
    Error(ErrorPayload),
    /// Roster change.
    PlayerListUpdate(PlayerListUpdate),
    /// Phase transition.
    PhaseChange(PhaseChange),
    /// Discussion countdown.
    DiscussionTimer(DiscussionTimer),
    /// Ballot counters.
    VoteProgress(VoteProgress),
    /// Answer counters.
    AnswerProgress(AnswerProgress),
    /// Private round role.
    RoleAssignment(RoleAssignment),
    /// Chat line.
    ChatMessage(ChatBroadcast),
    /// Round countdown.
    GameStarting(GameStarting),
    /// Liveness probe.
    Ping(EmptyPayload),
    /// Liveness reply.
    Pong(EmptyPayload),
}

/// Outbound message plus envelope metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundEnvelope<'a> {
    #[serde(flatten)]
    message: &'a OutboundMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    player_id: Option<&'a str>,
    timestamp: u64,
}

impl OutboundMessage {
    /// Shorthand for an `error` envelope.
    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        OutboundMessage::Error(ErrorPayload {
            message: message.into(),
            code: code.into(),
        })
    }

    /// Serialise the envelope into a text frame.
    ///
    /// Serialization failures are a bug rather than a delivery problem; they are
    /// logged and yield `None`.
    pub fn to_frame(&self, player_id: Option<&str>) -> Option<Message> {
        let envelope = OutboundEnvelope {
            message: self,
            player_id,
            timestamp: now_ms(),
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound message `{self:?}`");
                None
            }
        }
    }
}

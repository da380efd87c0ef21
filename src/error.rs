use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::state::state_machine::{GamePhase, InvalidTransition};

/// Failures raised while decoding and validating an inbound envelope.
///
/// These never close the connection; the dispatcher turns them into a single
/// `error` envelope for the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object, or lacks a string `type`.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// `timestamp` is missing, not a number, or outside the freshness window.
    #[error("message timestamp is missing, stale or too far in the future")]
    StaleOrInvalidTimestamp,
    /// `type` is not part of the inbound catalog.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    /// The message type requires a joined player and the connection has none.
    #[error("join a room before sending `{0}`")]
    AuthenticationRequired(String),
    /// A payload field is missing or has the wrong type.
    #[error("invalid field `{field}`: {reason}")]
    SchemaViolation {
        /// Offending payload field.
        field: String,
        /// Human readable explanation.
        reason: String,
    },
    /// A text field exceeds its configured length.
    #[error("field `{field}` exceeds {max} characters")]
    MessageTooLong {
        /// Offending payload field.
        field: String,
        /// Configured limit.
        max: usize,
    },
}

impl ProtocolError {
    /// Build a schema violation for `field`.
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable wire code sent in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            ProtocolError::StaleOrInvalidTimestamp => "STALE_OR_INVALID_TIMESTAMP",
            ProtocolError::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            ProtocolError::AuthenticationRequired(_) => "AUTHENTICATION_REQUIRED",
            ProtocolError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            ProtocolError::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Envelope or payload failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Operation cannot be performed in the current phase.
    #[error("`{action}` is not allowed during the {actual} phase")]
    InvalidPhase {
        /// Rejected operation.
        action: &'static str,
        /// Phase the room was in.
        actual: GamePhase,
    },
    /// The voter already cast a ballot this round.
    #[error("you have already voted this round")]
    DuplicateVote,
    /// Not enough active players to start a round.
    #[error("at least {required} players are required (currently {actual})")]
    InsufficientPlayers {
        /// Configured minimum.
        required: usize,
        /// Active players in the room.
        actual: usize,
    },
    /// Room code is not exactly three ASCII digits.
    #[error("invalid room code `{0}`: expected 3 digits")]
    InvalidRoomCode(String),
    /// No live room has this code.
    #[error("room `{0}` does not exist")]
    RoomNotFound(String),
    /// Every candidate room code was already taken.
    #[error("no free room code available")]
    CodeSpaceExhausted,
    /// Join request carried unusable player data.
    #[error("invalid player data: {0}")]
    InvalidPlayerData(String),
    /// State machine refused the transition.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl ServiceError {
    /// Stable wire code sent in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Protocol(err) => err.code(),
            ServiceError::InvalidPhase { .. } => "INVALID_PHASE",
            ServiceError::DuplicateVote => "DUPLICATE_VOTE",
            ServiceError::InsufficientPlayers { .. } => "INSUFFICIENT_PLAYERS",
            ServiceError::InvalidRoomCode(_) => "INVALID_ROOM_CODE",
            ServiceError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ServiceError::CodeSpaceExhausted => "CODE_SPACE_EXHAUSTED",
            ServiceError::InvalidPlayerData(_) => "INVALID_PLAYER_DATA",
            ServiceError::InvalidTransition(_) => "INVALID_TRANSITION",
        }
    }

    /// Shorthand for an [`ServiceError::InvalidPhase`] error.
    pub fn invalid_phase(action: &'static str, actual: GamePhase) -> Self {
        ServiceError::InvalidPhase { action, actual }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::CodeSpaceExhausted => AppError::ServiceUnavailable(err.to_string()),
            ServiceError::RoomNotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::InvalidPhase { .. }
            | ServiceError::DuplicateVote
            | ServiceError::InsufficientPlayers { .. }
            | ServiceError::InvalidTransition(_) => AppError::Conflict(err.to_string()),
            ServiceError::Protocol(_)
            | ServiceError::InvalidRoomCode(_)
            | ServiceError::InvalidPlayerData(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

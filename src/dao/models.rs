use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    dto::{format_epoch_ms, now_ms},
    state::{
        game::{Player, Vote},
        rooms::RoomInner,
    },
};

/// Row mirroring one room's session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Room code, primary key.
    pub room_code: String,
    /// Current phase name.
    pub phase: String,
    /// Phase generation, so late writes can be told apart from fresh ones.
    pub generation: u64,
    pub question_id: Option<u32>,
    /// Kept server side only; never sent to clients before results.
    pub imposter_id: Option<String>,
    pub discussion_ends_at: Option<String>,
    pub host_id: Option<String>,
    /// Serialized tally once a round reached results.
    pub results: Option<Value>,
    pub updated_at: String,
}

impl SessionEntity {
    /// Snapshot the locked room.
    pub fn from_room(room_code: &str, inner: &RoomInner) -> Self {
        let session = &inner.session;
        Self {
            room_code: room_code.to_string(),
            phase: inner.machine.phase().as_str().to_string(),
            generation: inner.machine.version(),
            question_id: session.question_id,
            imposter_id: session.imposter_id.clone(),
            discussion_ends_at: session.discussion_ends_at.map(format_epoch_ms),
            host_id: inner.membership.host().map(str::to_string),
            results: session
                .results
                .as_ref()
                .and_then(|results| serde_json::to_value(results).ok()),
            updated_at: format_epoch_ms(now_ms()),
        }
    }
}

/// Row mirroring a player's presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub id: String,
    pub name: String,
    pub room_code: String,
    pub is_active: bool,
    pub is_ready: bool,
    pub joined_at: String,
    pub updated_at: String,
}

impl From<&Player> for PlayerEntity {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            room_code: player.room_code.clone(),
            is_active: player.active,
            is_ready: player.ready,
            joined_at: format_epoch_ms(player.joined_at),
            updated_at: format_epoch_ms(now_ms()),
        }
    }
}

/// Row recording one ballot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    pub room_code: String,
    pub voter_id: String,
    pub target_id: String,
    pub created_at: String,
}

impl VoteEntity {
    /// Build the row for `vote` cast in `room_code`.
    pub fn new(room_code: &str, vote: &Vote) -> Self {
        Self {
            room_code: room_code.to_string(),
            voter_id: vote.voter_id.clone(),
            target_id: vote.target_id.clone(),
            created_at: format_epoch_ms(vote.timestamp),
        }
    }
}

/// Row recording one chat line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntity {
    pub id: Uuid,
    pub room_code: String,
    pub player_id: String,
    pub player_name: String,
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::GameEvent;

    #[test]
    fn session_row_tracks_phase_and_generation() {
        let mut inner = RoomInner::default();
        inner.membership.add_player("a");
        inner.session.begin_round(3, "a".into());
        inner.machine.apply(GameEvent::StartRound).unwrap();

        let row = SessionEntity::from_room("123", &inner);
        assert_eq!(row.room_code, "123");
        assert_eq!(row.phase, "question");
        assert_eq!(row.generation, 1);
        assert_eq!(row.question_id, Some(3));
        assert_eq!(row.host_id.as_deref(), Some("a"));
        assert!(row.results.is_none());
    }

    #[test]
    fn vote_row_uses_rfc3339_stamps() {
        let vote = Vote {
            voter_id: "a".into(),
            target_id: "b".into(),
            timestamp: 0,
        };
        let row = VoteEntity::new("123", &vote);
        assert_eq!(row.created_at, "1970-01-01T00:00:00Z");
    }
}

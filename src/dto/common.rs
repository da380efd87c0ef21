use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{
    game::{Player, RoundResults},
    rooms::RoomInner,
    state_machine::GamePhase,
};

/// Public projection of a player.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
    pub ready: bool,
    pub is_host: bool,
    pub joined_at: u64,
}

impl PlayerSummary {
    fn from_player(player: &Player, host: Option<&str>) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            ready: player.ready,
            is_host: host == Some(player.id.as_str()),
            joined_at: player.joined_at,
        }
    }
}

/// Active players of a room, in join order.
pub fn player_summaries(inner: &RoomInner) -> Vec<PlayerSummary> {
    let host = inner.membership.host();
    inner
        .active_players()
        .map(|player| PlayerSummary::from_player(player, host))
        .collect()
}

/// Session state as every member of the room may see it.
///
/// The imposter is only ever disclosed inside `results`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicGameView {
    pub phase: GamePhase,
    pub players: Vec<PlayerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<u32>,
    /// Present during discussion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discussion_ends_at: Option<u64>,
    /// Revealed from discussion onward.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub answers: Option<IndexMap<String, String>>,
    /// Number of answers submitted this round.
    pub answers_received: usize,
    /// Number of ballots cast this voting phase.
    pub votes_received: usize,
    /// Present during results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<RoundResults>,
}

impl PublicGameView {
    /// Project the locked room state.
    pub fn from_room(inner: &RoomInner) -> Self {
        let phase = inner.machine.phase();
        let session = &inner.session;
        let answers_visible = matches!(
            phase,
            GamePhase::Discussion | GamePhase::Voting | GamePhase::Results
        );

        Self {
            phase,
            players: player_summaries(inner),
            host_id: inner.membership.host().map(str::to_string),
            question_id: session.question_id,
            discussion_ends_at: session.discussion_ends_at,
            answers: answers_visible.then(|| session.answers.clone()),
            answers_received: session.answers.len(),
            votes_received: session.votes.len(),
            results: session.results.clone(),
        }
    }
}

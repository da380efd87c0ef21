use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ServiceError;

/// Logical participant of a room, stable across reconnects.
#[derive(Debug, Clone)]
pub struct Player {
    /// Identifier chosen by the client or generated on first join.
    pub id: String,
    /// Self-asserted display name.
    pub name: String,
    /// Room the player belongs to. Never changes for a given player.
    pub room_code: String,
    /// Cleared when the player leaves or is evicted.
    pub active: bool,
    /// Lobby readiness; only meaningful while waiting.
    pub ready: bool,
    /// Join time in epoch milliseconds.
    pub joined_at: u64,
    /// Live connection currently representing the player, if any.
    pub connection_id: Option<Uuid>,
}

impl Player {
    /// Build a freshly joined, active, not-ready player.
    pub fn new(id: String, name: String, room_code: String, connection_id: Uuid) -> Self {
        Self {
            id,
            name,
            room_code,
            active: true,
            ready: false,
            joined_at: crate::dto::now_ms(),
            connection_id: Some(connection_id),
        }
    }
}

/// Single ballot cast during a voting phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Player who voted.
    pub voter_id: String,
    /// Player voted against.
    pub target_id: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
}

/// Tally computed when a round reaches the results phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundResults {
    /// Ballots per target, in order of first vote received.
    #[schema(value_type = Object)]
    pub vote_counts: IndexMap<String, u32>,
    /// Target with the highest count; ties go to the lowest player id.
    pub most_voted_player: Option<String>,
    /// Revealed imposter.
    pub imposter_id: Option<String>,
    /// True when the most voted player is the imposter.
    pub players_win: bool,
    /// Number of ballots counted.
    pub total_votes: usize,
}

/// Round data owned by a room. Phase lives in the state machine next to it.
#[derive(Debug, Clone, Default)]
pub struct GameSession {
    /// Prompt drawn for the current round.
    pub question_id: Option<u32>,
    /// Hidden until results.
    pub imposter_id: Option<String>,
    /// Discussion deadline in epoch milliseconds.
    pub discussion_ends_at: Option<u64>,
    /// Answers keyed by player id, in submission order.
    pub answers: IndexMap<String, String>,
    /// Ballots for the current voting phase.
    pub votes: Vec<Vote>,
    /// Computed on entry to results.
    pub results: Option<RoundResults>,
}

impl GameSession {
    /// Seed a new round.
    pub fn begin_round(&mut self, question_id: u32, imposter_id: String) {
        self.reset();
        self.question_id = Some(question_id);
        self.imposter_id = Some(imposter_id);
    }

    /// Clear everything tied to a round.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether `voter_id` already voted this phase.
    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.votes.iter().any(|vote| vote.voter_id == voter_id)
    }

    /// Append a ballot, refusing a second one from the same voter.
    pub fn record_vote(&mut self, vote: Vote) -> Result<(), ServiceError> {
        if self.has_voted(&vote.voter_id) {
            return Err(ServiceError::DuplicateVote);
        }
        self.votes.push(vote);
        Ok(())
    }

    /// Drop the ballot of a player who left. Returns true if one was removed.
    pub fn withdraw_vote(&mut self, voter_id: &str) -> bool {
        let before = self.votes.len();
        self.votes.retain(|vote| vote.voter_id != voter_id);
        before != self.votes.len()
    }

    /// Tally the collected ballots against the hidden imposter.
    pub fn calculate_results(&self) -> RoundResults {
        tally(&self.votes, self.imposter_id.as_deref())
    }
}

/// Count ballots per target and decide the outcome.
///
/// The most voted player has the strictly highest count; on equal counts the
/// lexicographically lowest player id wins, whatever order the ballots came in.
pub fn tally(votes: &[Vote], imposter_id: Option<&str>) -> RoundResults {
    let mut vote_counts: IndexMap<String, u32> = IndexMap::new();
    for vote in votes {
        *vote_counts.entry(vote.target_id.clone()).or_default() += 1;
    }

    let most_voted_player = vote_counts
        .iter()
        .max_by(|(a_target, a_count), (b_target, b_count)| {
            a_count.cmp(b_count).then_with(|| b_target.cmp(a_target))
        })
        .map(|(target, _)| target.clone());

    let players_win = match (&most_voted_player, imposter_id) {
        (Some(target), Some(imposter)) => target == imposter,
        _ => false,
    };

    RoundResults {
        vote_counts,
        most_voted_player,
        imposter_id: imposter_id.map(str::to_string),
        players_win,
        total_votes: votes.len(),
    }
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Phases a room's session cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Lobby: players join and ready up. Initial and end-of-round state.
    Waiting,
    /// Prompt is shown; players submit answers.
    Question,
    /// Answers are revealed and players talk it over against a deadline.
    Discussion,
    /// Players vote for who they think the imposter is.
    Voting,
    /// Tally and imposter reveal.
    Results,
}

impl GamePhase {
    /// Every phase, in cycle order.
    pub const ALL: [GamePhase; 5] = [
        GamePhase::Waiting,
        GamePhase::Question,
        GamePhase::Discussion,
        GamePhase::Voting,
        GamePhase::Results,
    ];

    /// Wire name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::Waiting => "waiting",
            GamePhase::Question => "question",
            GamePhase::Discussion => "discussion",
            GamePhase::Voting => "voting",
            GamePhase::Results => "results",
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown phase name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase `{0}`")]
pub struct UnknownPhase(pub String);

impl FromStr for GamePhase {
    type Err = UnknownPhase;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        GamePhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == value)
            .ok_or_else(|| UnknownPhase(value.to_string()))
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Enough players are ready (or someone pressed start) in the lobby.
    StartRound,
    /// Every active player submitted an answer.
    AnswersCollected,
    /// The question timer ran out.
    QuestionElapsed,
    /// The discussion deadline passed.
    DiscussionElapsed,
    /// Every active player voted.
    VotesCollected,
    /// The voting timer ran out; results use the ballots received so far.
    VotingElapsed,
    /// Results were shown long enough.
    ResultsElapsed,
    /// A player asked for another round from the results screen.
    NewGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Outcome of an applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase before the transition.
    pub from: GamePhase,
    /// Phase after the transition.
    pub to: GamePhase,
    /// Generation after the transition.
    pub version: u64,
}

/// Per-room phase machine.
///
/// `version` doubles as the phase generation captured by timers: a timer armed
/// under generation `n` only acts if the machine is still at `n` when it fires.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    version: u64,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            phase: GamePhase::Waiting,
            version: 0,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine initialised in the waiting state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Current generation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Validate and apply `event`, bumping the generation.
    pub fn apply(&mut self, event: GameEvent) -> Result<Transition, InvalidTransition> {
        let next = self.compute_transition(event)?;
        Ok(self.enter(next))
    }

    /// Move to `phase` regardless of the cycle. Admin/debug path only.
    pub fn force(&mut self, phase: GamePhase) -> Transition {
        self.enter(phase)
    }

    fn enter(&mut self, next: GamePhase) -> Transition {
        let from = self.phase;
        self.phase = next;
        self.version += 1;
        Transition {
            from,
            to: next,
            version: self.version,
        }
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Waiting, GameEvent::StartRound) => GamePhase::Question,
            (GamePhase::Question, GameEvent::AnswersCollected | GameEvent::QuestionElapsed) => {
                GamePhase::Discussion
            }
            (GamePhase::Discussion, GameEvent::DiscussionElapsed) => GamePhase::Voting,
            (GamePhase::Voting, GameEvent::VotesCollected | GameEvent::VotingElapsed) => {
                GamePhase::Results
            }
            (GamePhase::Results, GameEvent::ResultsElapsed | GameEvent::NewGame) => {
                GamePhase::Waiting
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

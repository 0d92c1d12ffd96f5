//! Event Envelopes
//!
//! Durable event types written to the log. The analytics and persistence
//! tails rebuild completed games from these alone, so every envelope
//! carries enough to be replayed without the in-memory session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::board::BOARD_SIZE;
use crate::game::session::{ActorType, AiDifficulty, GameId, GameType, StoneColor, UserId};

/// Unique event identifier.
pub type EventId = Uuid;

// =============================================================================
// TOPICS
// =============================================================================

/// Queue membership changes; single effective partition for total order.
pub const TOPIC_QUEUE_EVENTS: &str = "queue-events";

/// Emitted matches, keyed by game id.
pub const TOPIC_MATCH_CREATED: &str = "match-created";

/// Applied moves, keyed by game id.
pub const TOPIC_GAME_MOVE: &str = "game-move-made";

/// Records that exhausted their publish retries.
pub const TOPIC_DEAD_LETTER: &str = "dead-letter";

/// Constant partition key that serializes all queue events.
pub const QUEUE_PARTITION_KEY: &str = "global-queue";

// =============================================================================
// QUEUE EVENTS
// =============================================================================

/// Queue membership action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueAction {
    /// Player entered the queue.
    PlayerJoined,
    /// Player left (explicitly, or via match cleanup).
    PlayerLeft,
    /// Reserved; folded identically to `PlayerLeft`.
    PlayerTimeout,
}

/// One queue membership change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    /// Unique event identifier.
    pub event_id: EventId,
    /// Affected player.
    pub player_id: UserId,
    /// What happened.
    pub action: QueueAction,
    /// Event time.
    pub at: DateTime<Utc>,
}

impl QueueEvent {
    /// A player joined the queue.
    pub fn joined(player_id: UserId) -> Self {
        Self::new(player_id, QueueAction::PlayerJoined)
    }

    /// A player left the queue.
    pub fn left(player_id: UserId) -> Self {
        Self::new(player_id, QueueAction::PlayerLeft)
    }

    fn new(player_id: UserId, action: QueueAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            player_id,
            action,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// MATCH CREATED
// =============================================================================

/// How a game came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchSource {
    /// Paired out of the FIFO queue.
    Matchmaking,
    /// Created directly against a named opponent.
    DirectChallenge,
    /// Created against the AI.
    AiGame,
}

/// A new game was created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCreatedEvent {
    /// Unique event identifier.
    pub event_id: EventId,
    /// The new game.
    pub game_id: GameId,
    /// Opponent kind.
    pub game_type: GameType,
    /// Player 1 (black).
    pub player1_id: UserId,
    /// Player 2, absent for human-vs-AI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player2_id: Option<UserId>,
    /// AI strength, absent for human-vs-human.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_difficulty: Option<AiDifficulty>,
    /// Origin of the pairing.
    pub source: MatchSource,
    /// Event time.
    pub at: DateTime<Utc>,
}

impl MatchCreatedEvent {
    /// A queue pairing.
    pub fn from_queue(game_id: GameId, player1_id: UserId, player2_id: UserId) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            game_id,
            game_type: GameType::HumanVsHuman,
            player1_id,
            player2_id: Some(player2_id),
            ai_difficulty: None,
            source: MatchSource::Matchmaking,
            at: Utc::now(),
        }
    }

    /// A direct challenge between two named players.
    pub fn direct(game_id: GameId, player1_id: UserId, player2_id: UserId) -> Self {
        Self {
            source: MatchSource::DirectChallenge,
            ..Self::from_queue(game_id, player1_id, player2_id)
        }
    }

    /// A game against the AI.
    pub fn ai_game(game_id: GameId, player1_id: UserId, difficulty: AiDifficulty) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            game_id,
            game_type: GameType::HumanVsAi,
            player1_id,
            player2_id: None,
            ai_difficulty: Some(difficulty),
            source: MatchSource::AiGame,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// GAME MOVES
// =============================================================================

/// One applied move, mirrored off the hot path for analytics and
/// persistence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMoveEvent {
    /// Unique event identifier.
    pub event_id: EventId,
    /// The game.
    pub game_id: GameId,
    /// 1-based move number; `(game_id, move_number)` is unique downstream.
    pub move_number: u32,
    /// Who produced the move.
    pub actor_type: ActorType,
    /// Acting user, absent for AI moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<UserId>,
    /// AI strength for AI moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_difficulty: Option<AiDifficulty>,
    /// Board row.
    pub row: u8,
    /// Board column.
    pub col: u8,
    /// Color of the placed stone.
    pub stone_color: StoneColor,
    /// Milliseconds the actor took.
    pub took_ms: u64,
    /// Full board snapshot after the move.
    pub board_after: [[u8; BOARD_SIZE]; BOARD_SIZE],
    /// Event time.
    pub at: DateTime<Utc>,
}

impl GameMoveEvent {
    /// Build from an applied move and the session it mutated.
    pub fn from_move(session: &crate::game::session::GameSession, mv: &crate::game::session::Move) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            game_id: session.game_id,
            move_number: mv.move_number,
            actor_type: mv.actor,
            player_id: mv.player_id.clone(),
            ai_difficulty: match mv.actor {
                ActorType::Ai => session.ai_difficulty,
                ActorType::Human => None,
            },
            row: mv.row,
            col: mv.col,
            stone_color: mv.stone_color,
            took_ms: mv.took_ms,
            board_after: session.board.snapshot(),
            at: mv.at,
        }
    }
}

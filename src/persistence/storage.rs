//! Game Storage
//!
//! The storage seam behind the persistence consumer: completed games and
//! their moves, written idempotently. The trait is the adapter boundary
//! for a relational backend; the in-memory store backs tests and
//! single-node deployments.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::events::types::MatchSource;
use crate::game::board::BOARD_SIZE;
use crate::game::session::{
    ActorType, AiDifficulty, GameId, GameType, StoneColor, UserId, WinnerType,
};

/// Storage failures (transient backend errors for real adapters).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend rejected or lost the write.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Lifecycle of a persisted game row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistedStatus {
    /// Created from a match event; play not yet recorded as finished.
    Waiting,
    /// Finished by win or draw.
    Completed,
    /// Finished by forfeit or idle timeout.
    Abandoned,
}

/// One persisted game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRow {
    /// Game identifier.
    pub game_id: GameId,
    /// Opponent kind.
    pub game_type: GameType,
    /// Row lifecycle.
    pub status: PersistedStatus,
    /// Player 1 (black).
    pub player1_id: UserId,
    /// Player 2, absent for human-vs-AI.
    pub player2_id: Option<UserId>,
    /// AI strength, absent for human-vs-human.
    pub ai_difficulty: Option<AiDifficulty>,
    /// Origin of the pairing.
    pub source: MatchSource,
    /// Winner classification once terminal.
    pub winner_type: WinnerType,
    /// Winning user when a human slot won.
    pub winner_id: Option<UserId>,
    /// Final board snapshot once terminal.
    pub final_board: Option<[[u8; BOARD_SIZE]; BOARD_SIZE]>,
    /// Creation time (from the match event).
    pub created_at: DateTime<Utc>,
    /// Termination time once terminal.
    pub ended_at: Option<DateTime<Utc>>,
}

/// One persisted move; `(game_id, move_number)` and `(game_id, row, col)`
/// are unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRow {
    /// Game identifier.
    pub game_id: GameId,
    /// 1-based move number.
    pub move_number: u32,
    /// Who produced the move.
    pub actor_type: ActorType,
    /// Acting user, absent for AI moves.
    pub player_id: Option<UserId>,
    /// Board row.
    pub row: u8,
    /// Board column.
    pub col: u8,
    /// Color of the placed stone.
    pub stone_color: StoneColor,
    /// Milliseconds the actor took.
    pub took_ms: u64,
    /// Move time.
    pub at: DateTime<Utc>,
}

/// Terminal fields applied to a game row.
#[derive(Clone, Debug)]
pub struct GameOutcome {
    /// Winner classification.
    pub winner_type: WinnerType,
    /// Winning user when a human slot won.
    pub winner_id: Option<UserId>,
    /// Final board snapshot.
    pub final_board: [[u8; BOARD_SIZE]; BOARD_SIZE],
    /// Termination time.
    pub ended_at: DateTime<Utc>,
}

/// Adapter boundary for the durable game history.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Insert a game row; a duplicate game id is a no-op returning false.
    async fn insert_game(&self, row: GameRow) -> Result<bool, StorageError>;

    /// Insert a move row; a duplicate `(game_id, move_number)` or
    /// `(game_id, row, col)` is a no-op returning false.
    async fn insert_move(&self, row: MoveRow) -> Result<bool, StorageError>;

    /// Mark a game completed with its outcome. Idempotent: a game already
    /// terminal is left untouched, returning false.
    async fn complete_game(&self, game_id: &GameId, outcome: GameOutcome)
        -> Result<bool, StorageError>;

    /// Mark a game abandoned with its outcome. Idempotent like
    /// `complete_game`.
    async fn abandon_game(&self, game_id: &GameId, outcome: GameOutcome)
        -> Result<bool, StorageError>;

    /// Load one game row.
    async fn get_game(&self, game_id: &GameId) -> Result<Option<GameRow>, StorageError>;

    /// Moves of a game ordered by move number.
    async fn moves_for(&self, game_id: &GameId) -> Result<Vec<MoveRow>, StorageError>;
}

#[derive(Default)]
struct Tables {
    games: HashMap<GameId, GameRow>,
    moves: HashMap<GameId, BTreeMap<u32, MoveRow>>,
    occupied: HashSet<(GameId, u8, u8)>,
}

/// In-memory `GameStore`.
#[derive(Default)]
pub struct InMemoryGameStore {
    tables: RwLock<Tables>,
}

impl InMemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored games (diagnostics and tests).
    pub async fn game_count(&self) -> usize {
        self.tables.read().await.games.len()
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn insert_game(&self, row: GameRow) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        if tables.games.contains_key(&row.game_id) {
            return Ok(false);
        }
        tables.games.insert(row.game_id, row);
        Ok(true)
    }

    async fn insert_move(&self, row: MoveRow) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let occupied_key = (row.game_id, row.row, row.col);
        if tables.occupied.contains(&occupied_key) {
            return Ok(false);
        }
        let game_moves = tables.moves.entry(row.game_id).or_default();
        if game_moves.contains_key(&row.move_number) {
            return Ok(false);
        }
        game_moves.insert(row.move_number, row);
        tables.occupied.insert(occupied_key);
        Ok(true)
    }

    async fn complete_game(
        &self,
        game_id: &GameId,
        outcome: GameOutcome,
    ) -> Result<bool, StorageError> {
        self.finish(game_id, PersistedStatus::Completed, outcome).await
    }

    async fn abandon_game(
        &self,
        game_id: &GameId,
        outcome: GameOutcome,
    ) -> Result<bool, StorageError> {
        self.finish(game_id, PersistedStatus::Abandoned, outcome).await
    }

    async fn get_game(&self, game_id: &GameId) -> Result<Option<GameRow>, StorageError> {
        Ok(self.tables.read().await.games.get(game_id).cloned())
    }

    async fn moves_for(&self, game_id: &GameId) -> Result<Vec<MoveRow>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .moves
            .get(game_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl InMemoryGameStore {
    async fn finish(
        &self,
        game_id: &GameId,
        status: PersistedStatus,
        outcome: GameOutcome,
    ) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        match tables.games.get_mut(game_id) {
            Some(row) if row.status == PersistedStatus::Waiting => {
                row.status = status;
                row.winner_type = outcome.winner_type;
                row.winner_id = outcome.winner_id;
                row.final_board = Some(outcome.final_board);
                row.ended_at = Some(outcome.ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//! Game Session State
//!
//! The live authoritative state of one game, plus the client-facing
//! projection (`GameStateView`). All mutation goes through `rules`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::board::{Board, Cell};

/// Unique game identifier.
pub type GameId = Uuid;

/// Stable user identifier minted by the external auth provider.
pub type UserId = String;

// =============================================================================
// ENUMS
// =============================================================================

/// Kind of opponent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    /// Two human players.
    HumanVsHuman,
    /// One human against the AI oracle.
    HumanVsAi,
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Moves are being accepted.
    InProgress,
    /// Ended by win or draw.
    Completed,
    /// Ended by forfeit or idle timeout.
    Abandoned,
}

impl GameStatus {
    /// Terminal states permit no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Abandoned)
    }
}

/// AI strength requested at game creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiDifficulty {
    /// Weakest oracle setting.
    Easy,
    /// Default oracle setting.
    Medium,
    /// Strong oracle setting.
    Hard,
    /// Strongest oracle setting.
    Expert,
}

/// Who won, if anyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WinnerType {
    /// Game still open (or abandoned with no winner recorded).
    None,
    /// Player 1 (black) won.
    Player1,
    /// Player 2 (white) won.
    Player2,
    /// The AI won a human-vs-AI game.
    Ai,
    /// Full board, no five-in-a-row.
    Draw,
}

/// Stone color on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoneColor {
    /// Player 1; always moves first.
    Black,
    /// Player 2 or the AI.
    White,
}

impl StoneColor {
    /// The board cell this color occupies.
    pub fn cell(self) -> Cell {
        match self {
            StoneColor::Black => Cell::Black,
            StoneColor::White => Cell::White,
        }
    }
}

/// Kind of actor that produced a move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    /// A human participant.
    Human,
    /// The AI oracle.
    Ai,
}

/// Player slot within a game. Slot one holds black and moves first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PlayerNum {
    /// Player 1 (black).
    One = 1,
    /// Player 2 (white / AI).
    Two = 2,
}

impl PlayerNum {
    /// The other slot.
    pub fn other(self) -> PlayerNum {
        match self {
            PlayerNum::One => PlayerNum::Two,
            PlayerNum::Two => PlayerNum::One,
        }
    }

    /// Stone color held by this slot.
    pub fn color(self) -> StoneColor {
        match self {
            PlayerNum::One => StoneColor::Black,
            PlayerNum::Two => StoneColor::White,
        }
    }
}

impl From<PlayerNum> for u8 {
    fn from(p: PlayerNum) -> u8 {
        p as u8
    }
}

impl TryFrom<u8> for PlayerNum {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PlayerNum::One),
            2 => Ok(PlayerNum::Two),
            other => Err(format!("invalid player number: {}", other)),
        }
    }
}

// =============================================================================
// MOVES
// =============================================================================

/// One entry of the replayable move history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    /// 1-based position in the game.
    pub move_number: u32,
    /// Who produced the move.
    pub actor: ActorType,
    /// Acting user, absent for AI moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<UserId>,
    /// Board row.
    pub row: u8,
    /// Board column.
    pub col: u8,
    /// Color of the placed stone.
    pub stone_color: StoneColor,
    /// Milliseconds the actor took since the previous activity.
    pub took_ms: u64,
    /// Server receive time.
    pub at: DateTime<Utc>,
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// The live authoritative state of one game.
///
/// Invariants (enforced in `rules`, re-checked in tests):
/// - a non-empty cell never reverts or changes value;
/// - `move_count == move_history.len()`;
/// - a terminal `status` has `ended_at` set and admits no further mutation;
/// - `HumanVsHuman` has `player2_id` and no difficulty, `HumanVsAi` the
///   reverse.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    /// Unique identifier.
    pub game_id: GameId,
    /// Opponent kind.
    pub game_type: GameType,
    /// Lifecycle state.
    pub status: GameStatus,
    /// Player 1; holds black, always moves first.
    pub player1_id: UserId,
    /// Player 2, absent for human-vs-AI.
    pub player2_id: Option<UserId>,
    /// AI strength, absent for human-vs-human.
    pub ai_difficulty: Option<AiDifficulty>,
    /// The grid.
    pub board: Board,
    /// Slot to move next.
    pub current_player: PlayerNum,
    /// Number of applied moves.
    pub move_count: u32,
    /// Replayable history.
    pub move_history: Vec<Move>,
    /// Winner classification.
    pub winner_type: WinnerType,
    /// Winning user, when `winner_type` names a human slot.
    pub winner_id: Option<UserId>,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Last mutation time; drives the idle TTL.
    pub last_activity: DateTime<Utc>,
    /// Termination time.
    pub ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// Create a human-vs-human session.
    pub fn new_pvp(game_id: GameId, player1_id: UserId, player2_id: UserId) -> Self {
        Self::new(game_id, GameType::HumanVsHuman, player1_id, Some(player2_id), None)
    }

    /// Create a human-vs-AI session.
    pub fn new_pvai(game_id: GameId, player1_id: UserId, difficulty: AiDifficulty) -> Self {
        Self::new(game_id, GameType::HumanVsAi, player1_id, None, Some(difficulty))
    }

    fn new(
        game_id: GameId,
        game_type: GameType,
        player1_id: UserId,
        player2_id: Option<UserId>,
        ai_difficulty: Option<AiDifficulty>,
    ) -> Self {
        let now = Utc::now();
        Self {
            game_id,
            game_type,
            status: GameStatus::InProgress,
            player1_id,
            player2_id,
            ai_difficulty,
            board: Board::new(),
            current_player: PlayerNum::One,
            move_count: 0,
            move_history: Vec::new(),
            winner_type: WinnerType::None,
            winner_id: None,
            started_at: now,
            last_activity: now,
            ended_at: None,
        }
    }

    /// The slot a user occupies, or `None` for non-participants.
    pub fn participant(&self, user_id: &str) -> Option<PlayerNum> {
        if self.player1_id == user_id {
            return Some(PlayerNum::One);
        }
        match &self.player2_id {
            Some(p2) if p2 == user_id => Some(PlayerNum::Two),
            _ => None,
        }
    }

    /// Whether it is the AI's turn in a human-vs-AI game.
    pub fn ai_to_move(&self) -> bool {
        self.game_type == GameType::HumanVsAi
            && self.status == GameStatus::InProgress
            && self.current_player == PlayerNum::Two
    }

    /// User id for a slot, absent for the AI slot.
    pub fn user_for(&self, slot: PlayerNum) -> Option<&UserId> {
        match slot {
            PlayerNum::One => Some(&self.player1_id),
            PlayerNum::Two => self.player2_id.as_ref(),
        }
    }

    /// Record a win for a slot. For the AI slot of a PvAI game the winner
    /// is classified `Ai` with no winner id.
    pub(crate) fn record_winner(&mut self, slot: PlayerNum) {
        match (slot, self.game_type) {
            (PlayerNum::Two, GameType::HumanVsAi) => {
                self.winner_type = WinnerType::Ai;
                self.winner_id = None;
            }
            (PlayerNum::One, _) => {
                self.winner_type = WinnerType::Player1;
                self.winner_id = Some(self.player1_id.clone());
            }
            (PlayerNum::Two, _) => {
                self.winner_type = WinnerType::Player2;
                self.winner_id = self.player2_id.clone();
            }
        }
    }

    /// Client-facing projection.
    pub fn view(&self) -> GameStateView {
        GameStateView {
            game_id: self.game_id,
            game_type: self.game_type,
            status: self.status,
            player1_id: self.player1_id.clone(),
            player2_id: self.player2_id.clone(),
            ai_difficulty: self.ai_difficulty,
            board: self.board.snapshot(),
            current_player: self.current_player,
            move_count: self.move_count,
            winner_type: self.winner_type,
            winner_id: self.winner_id.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_activity: self.last_activity,
        }
    }
}

/// Projection of a `GameSession` sent to clients and broadcast on game
/// topics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    /// Game identifier.
    pub game_id: GameId,
    /// Opponent kind.
    pub game_type: GameType,
    /// Lifecycle state.
    pub status: GameStatus,
    /// Player 1 (black).
    pub player1_id: UserId,
    /// Player 2, absent for human-vs-AI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player2_id: Option<UserId>,
    /// AI strength, absent for human-vs-human.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_difficulty: Option<AiDifficulty>,
    /// Integer grid snapshot.
    pub board: [[u8; crate::game::board::BOARD_SIZE]; crate::game::board::BOARD_SIZE],
    /// Slot to move next.
    pub current_player: PlayerNum,
    /// Number of applied moves.
    pub move_count: u32,
    /// Winner classification.
    pub winner_type: WinnerType,
    /// Winning user, if a human slot won.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Termination time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Last mutation time.
    pub last_activity: DateTime<Utc>,
}

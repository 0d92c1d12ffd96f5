//! Game Logic Module
//!
//! Board representation, session state and the move engine. Everything in
//! this module is synchronous and free of I/O; the store and delivery
//! layers drive it.
//!
//! ## Module Structure
//!
//! - `board`: 15x15 grid and the five-in-a-row scan
//! - `session`: live session state and the client projection
//! - `rules`: legality, move application, termination, forfeit

pub mod board;
pub mod rules;
pub mod session;

// Re-export key types
pub use board::{Board, Cell, BOARD_SIZE, MAX_MOVES, WIN_LENGTH};
pub use rules::{apply_forfeit, apply_move, GameError, MoveActor};
pub use session::{
    ActorType, AiDifficulty, GameId, GameSession, GameStateView, GameStatus, GameType, Move,
    PlayerNum, StoneColor, UserId, WinnerType,
};

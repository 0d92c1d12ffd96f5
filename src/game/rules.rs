//! Move Engine
//!
//! Legality, board mutation and termination detection. Pure over a
//! `GameSession` plus a proposed move: the same session and inputs always
//! produce the same outcome, and a rejected move leaves the session
//! untouched.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::game::board::{Board, MAX_MOVES};
use crate::game::session::{ActorType, GameSession, GameStatus, Move, PlayerNum, WinnerType};

/// Typed rejection of a proposed mutation. Surfaced to the offending actor
/// only; the session is never mutated on the error path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// The session is in a terminal state.
    #[error("game already finished")]
    GameCompleted,

    /// The actor is not a participant of this game.
    #[error("not a participant of this game")]
    Unauthorized,

    /// It is the other player's turn.
    #[error("not your turn")]
    NotYourTurn,

    /// Position out of bounds or already occupied.
    #[error("invalid move: {0}")]
    InvalidMove(String),
}

/// Who is proposing a move.
#[derive(Debug, Clone, Copy)]
pub enum MoveActor<'a> {
    /// A human participant, identified by user id.
    Human(&'a str),
    /// The AI oracle (slot two of a human-vs-AI game).
    Ai,
}

/// Validate and apply one move, then run termination detection.
///
/// Legality is checked in order: session open, participant, turn, bounds,
/// cell empty. On success the stone is written, the move appended to the
/// history, and either the game terminates (win or draw) or the turn
/// toggles. Returns the appended move for event emission.
pub fn apply_move(
    session: &mut GameSession,
    actor: MoveActor<'_>,
    row: i32,
    col: i32,
    at: DateTime<Utc>,
) -> Result<Move, GameError> {
    if session.status != GameStatus::InProgress {
        return Err(GameError::GameCompleted);
    }

    let (slot, actor_type, player_id) = match actor {
        MoveActor::Human(user_id) => {
            let slot = session.participant(user_id).ok_or(GameError::Unauthorized)?;
            (slot, ActorType::Human, Some(user_id.to_string()))
        }
        MoveActor::Ai => {
            if session.user_for(PlayerNum::Two).is_some() || session.ai_difficulty.is_none() {
                return Err(GameError::Unauthorized);
            }
            (PlayerNum::Two, ActorType::Ai, None)
        }
    };

    if slot != session.current_player {
        return Err(GameError::NotYourTurn);
    }

    if !Board::in_bounds(row, col) {
        return Err(GameError::InvalidMove(format!(
            "position ({}, {}) is off the board",
            row, col
        )));
    }
    let (row, col) = (row as usize, col as usize);

    if !session.board.is_empty(row, col) {
        return Err(GameError::InvalidMove(format!(
            "position ({}, {}) is occupied",
            row, col
        )));
    }

    // All checks passed; mutate.
    let stone = slot.color();
    session.board.place(row, col, stone.cell());

    let took_ms = at
        .signed_duration_since(session.last_activity)
        .num_milliseconds()
        .max(0) as u64;

    let mv = Move {
        move_number: session.move_count + 1,
        actor: actor_type,
        player_id,
        row: row as u8,
        col: col as u8,
        stone_color: stone,
        took_ms,
        at,
    };
    session.move_history.push(mv.clone());
    session.move_count += 1;
    session.last_activity = at;

    // Termination detection.
    if session.board.five_through(row, col) {
        session.status = GameStatus::Completed;
        session.record_winner(slot);
        session.ended_at = Some(at);
    } else if session.move_count == MAX_MOVES {
        session.status = GameStatus::Completed;
        session.winner_type = WinnerType::Draw;
        session.winner_id = None;
        session.ended_at = Some(at);
    } else {
        session.current_player = slot.other();
    }

    Ok(mv)
}

/// Forfeit a game: the opponent of the forfeiting participant wins and the
/// session is marked abandoned.
pub fn apply_forfeit(
    session: &mut GameSession,
    actor_id: &str,
    at: DateTime<Utc>,
) -> Result<(), GameError> {
    if session.status != GameStatus::InProgress {
        return Err(GameError::GameCompleted);
    }

    let slot = session.participant(actor_id).ok_or(GameError::Unauthorized)?;

    session.status = GameStatus::Abandoned;
    session.record_winner(slot.other());
    session.last_activity = at;
    session.ended_at = Some(at);

    Ok(())
}

/// Mark an idle session abandoned (janitor path). No winner is recorded:
/// both sides went silent.
pub fn abandon_idle(session: &mut GameSession, at: DateTime<Utc>) -> bool {
    if session.status != GameStatus::InProgress {
        return false;
    }
    session.status = GameStatus::Abandoned;
    session.last_activity = at;
    session.ended_at = Some(at);
    true
}

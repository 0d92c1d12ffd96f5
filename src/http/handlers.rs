//! REST Handlers
//!
//! Endpoint bodies for the game and matchmaking API. Every handler
//! resolves the bearer principal first; game reads check participation;
//! mutations run through the play service. Queue membership truth lives
//! only inside the aggregator, so the queue endpoints acknowledge the
//! appended event rather than reporting queue state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::Reply;

use crate::events::producer::EventProducer;
use crate::events::types::QueueEvent;
use crate::game::session::{AiDifficulty, GameId, GameType, Move, UserId};
use crate::http::error::{
    auth_error_response, error_response, store_error_response,
};
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::protocol::game_topic;
use crate::play::PlayService;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiContext {
    /// Play flow (creation, moves, forfeit, session reads).
    pub play: Arc<PlayService>,
    /// Queue event producer.
    pub producer: EventProducer,
    /// Token validation config.
    pub auth: AuthConfig,
}

impl ApiContext {
    fn principal(&self, auth_header: Option<&str>, path: &str) -> Result<UserId, Response> {
        authenticate(auth_header, None, &self.auth).map_err(|e| auth_error_response(&e, path))
    }
}

// =============================================================================
// REQUEST / RESPONSE SHAPES
// =============================================================================

/// Body of `POST /api/game/create`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    /// Opponent kind.
    pub game_type: GameType,
    /// Opponent for a direct PvP challenge.
    #[serde(default)]
    pub player2_id: Option<String>,
    /// Strength for a PvAI game.
    #[serde(default)]
    pub ai_difficulty: Option<AiDifficulty>,
}

/// Reply of `POST /api/game/create`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameResponse {
    /// The new game.
    pub game_id: GameId,
    /// Opponent kind.
    pub game_type: GameType,
    /// Topic carrying the game's broadcasts.
    pub websocket_topic: String,
    /// Human-readable confirmation.
    pub message: String,
}

/// Body of `POST /api/game/{gameId}/move`.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// Board row.
    pub row: i32,
    /// Board column.
    pub col: i32,
}

/// Reply of `POST /api/matchmaking/queue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJoinResponse {
    /// Acknowledgment status.
    pub status: &'static str,
    /// Server time of the join event.
    pub joined_at: chrono::DateTime<Utc>,
    /// Human-readable note.
    pub message: String,
}

/// Reply of `DELETE /api/matchmaking/queue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLeaveResponse {
    /// Acknowledgment status.
    pub status: &'static str,
}

/// Reply of `GET /api/matchmaking/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    /// Always `NOT_IN_QUEUE`; see the handler.
    pub status: &'static str,
    /// Always false.
    pub in_queue: bool,
    /// Where the truth actually arrives.
    pub message: &'static str,
}

// =============================================================================
// GAME ENDPOINTS
// =============================================================================

/// `POST /api/game/create`
pub async fn create_game(
    ctx: ApiContext,
    auth_header: Option<String>,
    request: CreateGameRequest,
) -> Response {
    let path = "/api/game/create";
    let user = match ctx.principal(auth_header.as_deref(), path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let result = match request.game_type {
        GameType::HumanVsHuman => match request.player2_id.as_deref() {
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "player2Id is required for HUMAN_VS_HUMAN",
                    path,
                )
            }
            Some(opponent) if opponent == user => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "cannot challenge yourself",
                    path,
                )
            }
            Some(opponent) => ctx.play.create_direct_game(&user, opponent).await,
        },
        GameType::HumanVsAi => match request.ai_difficulty {
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "aiDifficulty is required for HUMAN_VS_AI",
                    path,
                )
            }
            Some(difficulty) => ctx.play.create_ai_game(&user, difficulty).await,
        },
    };

    match result {
        Ok(view) => {
            let body = CreateGameResponse {
                game_id: view.game_id,
                game_type: view.game_type,
                websocket_topic: game_topic(&view.game_id),
                message: "game created".to_string(),
            };
            reply::with_status(reply::json(&body), StatusCode::CREATED).into_response()
        }
        Err(e) => store_error_response(&e, path),
    }
}

/// `GET /api/game/{gameId}`
pub async fn get_game(ctx: ApiContext, auth_header: Option<String>, game_id: GameId) -> Response {
    let path = format!("/api/game/{game_id}");
    let user = match ctx.principal(auth_header.as_deref(), &path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match ctx.play.store().get(&game_id).await {
        Ok(session) => {
            if session.participant(&user).is_none() {
                return error_response(
                    StatusCode::FORBIDDEN,
                    "not a participant of this game",
                    &path,
                );
            }
            reply::json(&session.view()).into_response()
        }
        Err(e) => store_error_response(&e, &path),
    }
}

/// `POST /api/game/{gameId}/move`
///
/// The synchronous move surface for PvAI games: the reply includes the
/// AI's answer when the oracle responded. PvP moves travel over the
/// WebSocket ingress instead.
pub async fn post_move(
    ctx: ApiContext,
    auth_header: Option<String>,
    game_id: GameId,
    request: MoveRequest,
) -> Response {
    let path = format!("/api/game/{game_id}/move");
    let user = match ctx.principal(auth_header.as_deref(), &path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match ctx.play.store().get(&game_id).await {
        Ok(session) => {
            if session.participant(&user).is_none() {
                return error_response(
                    StatusCode::FORBIDDEN,
                    "not a participant of this game",
                    &path,
                );
            }
            if session.game_type == GameType::HumanVsHuman {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "PvP moves are played over the websocket endpoint",
                    &path,
                );
            }
        }
        Err(e) => return store_error_response(&e, &path),
    }

    match ctx.play.human_move(game_id, &user, request.row, request.col).await {
        Ok(view) => reply::json(&view).into_response(),
        Err(e) => store_error_response(&e, &path),
    }
}

/// `POST /api/game/{gameId}/forfeit`
pub async fn post_forfeit(
    ctx: ApiContext,
    auth_header: Option<String>,
    game_id: GameId,
) -> Response {
    let path = format!("/api/game/{game_id}/forfeit");
    let user = match ctx.principal(auth_header.as_deref(), &path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match ctx.play.forfeit(game_id, &user).await {
        Ok(view) => reply::json(&view).into_response(),
        Err(e) => store_error_response(&e, &path),
    }
}

/// `GET /api/game/{gameId}/moves`
pub async fn get_moves(ctx: ApiContext, auth_header: Option<String>, game_id: GameId) -> Response {
    let path = format!("/api/game/{game_id}/moves");
    let user = match ctx.principal(auth_header.as_deref(), &path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match ctx.play.store().get(&game_id).await {
        Ok(session) => {
            if session.participant(&user).is_none() {
                return error_response(
                    StatusCode::FORBIDDEN,
                    "not a participant of this game",
                    &path,
                );
            }
            let moves: &Vec<Move> = &session.move_history;
            reply::json(moves).into_response()
        }
        Err(e) => store_error_response(&e, &path),
    }
}

// =============================================================================
// MATCHMAKING ENDPOINTS
// =============================================================================

/// `POST /api/matchmaking/queue`
///
/// Appends a join event. The aggregator's fold deduplicates a player
/// already waiting, so the acknowledgment is always `JOINED`; pairing
/// arrives on `/user/queue/match-found`.
pub async fn join_queue(ctx: ApiContext, auth_header: Option<String>) -> Response {
    let path = "/api/matchmaking/queue";
    let user = match ctx.principal(auth_header.as_deref(), path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let event = QueueEvent::joined(user.clone());
    let joined_at = event.at;
    match ctx.producer.publish_queue(&event).await {
        Ok(()) => {
            info!(user_id = %user, "queue join accepted");
            reply::json(&QueueJoinResponse {
                status: "JOINED",
                joined_at,
                message: "waiting for an opponent; match arrives on /user/queue/match-found"
                    .to_string(),
            })
            .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), path),
    }
}

/// `DELETE /api/matchmaking/queue`
pub async fn leave_queue(ctx: ApiContext, auth_header: Option<String>) -> Response {
    let path = "/api/matchmaking/queue";
    let user = match ctx.principal(auth_header.as_deref(), path) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let event = QueueEvent::left(user.clone());
    match ctx.producer.publish_queue(&event).await {
        Ok(()) => {
            info!(user_id = %user, "queue leave accepted");
            reply::json(&QueueLeaveResponse { status: "LEFT" }).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), path),
    }
}

/// `GET /api/matchmaking/status`
///
/// Deliberately reports `NOT_IN_QUEUE`: the authoritative waiting list
/// lives inside the aggregator's state store and v1 exposes no read
/// channel into it. Clients learn of a match via the push queue.
pub async fn queue_status(ctx: ApiContext, auth_header: Option<String>) -> Response {
    let path = "/api/matchmaking/status";
    if let Err(response) = ctx.principal(auth_header.as_deref(), path) {
        return response;
    }

    reply::json(&QueueStatusResponse {
        status: "NOT_IN_QUEUE",
        in_queue: false,
        message: "queue state is push-only; listen on /user/queue/match-found",
    })
    .into_response()
}

/// `GET /health`
pub async fn health() -> Response {
    reply::json(&serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

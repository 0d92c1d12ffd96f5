//! AI Bridge
//!
//! Request-response client for the external move oracle. One POST per
//! move with a hard timeout and no retries: a failure leaves the session
//! as it was, with the human move applied and the AI turn still pending.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::game::board::BOARD_SIZE;
use crate::game::session::{AiDifficulty, PlayerNum};

/// Default oracle timeout.
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(30);

/// Bridge configuration.
#[derive(Clone, Debug)]
pub struct AiBridgeConfig {
    /// Oracle base URL; the move endpoint is `{base}/move`.
    pub base_url: String,
    /// Hard per-request timeout.
    pub timeout: Duration,
}

impl Default for AiBridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout: DEFAULT_AI_TIMEOUT,
        }
    }
}

/// Bridge failures. All collapse to "unavailable": the caller never
/// retries and never rolls back the human move.
#[derive(Debug, Error)]
pub enum AiError {
    /// Timeout, connection failure or a malformed oracle reply.
    #[error("ai service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleRequest<'a> {
    board: &'a [[u8; BOARD_SIZE]; BOARD_SIZE],
    current_player: u8,
    difficulty: AiDifficulty,
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    row: i32,
    col: i32,
}

/// Client for the external AI oracle.
pub struct AiBridge {
    client: reqwest::Client,
    config: AiBridgeConfig,
}

impl AiBridge {
    /// Build a bridge; the timeout is baked into the client.
    pub fn new(config: AiBridgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Ask the oracle for a move. Returns the proposed `(row, col)`; the
    /// caller validates it through the move engine like any other move.
    pub async fn request_move(
        &self,
        board: &[[u8; BOARD_SIZE]; BOARD_SIZE],
        current_player: PlayerNum,
        difficulty: AiDifficulty,
    ) -> Result<(i32, i32), AiError> {
        let url = format!("{}/move", self.config.base_url.trim_end_matches('/'));
        let request = OracleRequest {
            board,
            current_player: current_player.into(),
            difficulty,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AiError::Unavailable(format!(
                "oracle returned {}",
                response.status()
            )));
        }

        let reply: OracleResponse = response
            .json()
            .await
            .map_err(|e| AiError::Unavailable(e.to_string()))?;

        debug!(row = reply.row, col = reply.col, "oracle proposed move");
        Ok((reply.row, reply.col))
    }
}

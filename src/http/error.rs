//! HTTP Error Envelope
//!
//! Uniform JSON error body for the REST surface:
//! `{timestamp, status, error, message, path}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::Reply;

use crate::game::rules::GameError;
use crate::network::auth::AuthError;
use crate::store::session_store::StoreError;

/// Standard error body for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Server time of the failure.
    pub timestamp: DateTime<Utc>,
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Request path.
    pub path: String,
}

impl ErrorBody {
    /// Build a body for a status code.
    pub fn new(status: StatusCode, message: impl Into<String>, path: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: message.into(),
            path: path.to_string(),
        }
    }

    /// Render as a response with the matching status.
    pub fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        reply::with_status(reply::json(&self), status).into_response()
    }
}

/// Shorthand for an error response.
pub fn error_response(status: StatusCode, message: impl Into<String>, path: &str) -> Response {
    ErrorBody::new(status, message, path).into_response()
}

/// HTTP status for a store/game failure, per the error taxonomy.
pub fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists => StatusCode::INTERNAL_SERVER_ERROR,
        StoreError::Game(game) => match game {
            GameError::GameCompleted => StatusCode::CONFLICT,
            GameError::Unauthorized => StatusCode::FORBIDDEN,
            GameError::NotYourTurn => StatusCode::FORBIDDEN,
            GameError::InvalidMove(_) => StatusCode::BAD_REQUEST,
        },
    }
}

/// Render a store/game failure.
pub fn store_error_response(err: &StoreError, path: &str) -> Response {
    error_response(status_for(err), err.to_string(), path)
}

/// Render an authentication failure (always 401).
pub fn auth_error_response(err: &AuthError, path: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, err.to_string(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new(StatusCode::NOT_FOUND, "no such game", "/api/game/x");
        assert_eq!(body.status, 404);
        assert_eq!(body.error, "Not Found");
        assert_eq!(body.path, "/api/game/x");

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"timestamp\""));
        assert!(json.contains("\"message\":\"no such game\""));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&StoreError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&StoreError::Game(GameError::GameCompleted)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&StoreError::Game(GameError::NotYourTurn)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&StoreError::Game(GameError::Unauthorized)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&StoreError::Game(GameError::InvalidMove("x".into()))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_response_status_propagates() {
        let response = error_response(StatusCode::CONFLICT, "done", "/api/game/x/move");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

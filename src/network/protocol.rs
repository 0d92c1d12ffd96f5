//! Frame Protocol
//!
//! Wire format for the `/ws` endpoint: a STOMP-flavored JSON dialect with
//! client verbs CONNECT, SUBSCRIBE and SEND, plus server-pushed MESSAGE
//! and ERROR frames. Destinations address per-game broadcast topics,
//! per-user queues and the two ingress operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::rules::GameError;
use crate::game::session::GameId;
use crate::network::auth::AuthError;
use crate::store::session_store::StoreError;

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    /// Open the logical session, optionally presenting a bearer token.
    Connect {
        /// `Authorization` header value (`Bearer <jwt>` or raw token).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        /// Fallback bare token header.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Subscribe to a destination.
    Subscribe {
        /// Destination path, e.g. `/topic/game/{gameId}`.
        destination: String,
    },

    /// Release a subscription.
    Unsubscribe {
        /// Destination path.
        destination: String,
    },

    /// Send a payload to an application destination.
    Send {
        /// Destination path, e.g. `/app/game/{gameId}/move`.
        destination: String,
        /// Operation payload; empty object for forfeit.
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Liveness probe.
    Ping,
}

/// Ingress payload for a move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovePayload {
    /// Board row.
    pub row: i32,
    /// Board column.
    pub col: i32,
}

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    /// Reply to CONNECT. A failed authentication still connects; the
    /// principal is simply absent and authenticated frames get rejected.
    Connected {
        /// Bound principal, if the presented token validated.
        #[serde(skip_serializing_if = "Option::is_none")]
        principal: Option<String>,
        /// Server version string.
        server_version: String,
    },

    /// A payload delivered to one of the connection's subscriptions or
    /// per-user queues.
    Message {
        /// Originating destination.
        destination: String,
        /// The payload.
        payload: serde_json::Value,
    },

    /// An error for this connection only, addressed to its error queue.
    Error {
        /// Always the connection's error queue.
        destination: String,
        /// The error envelope.
        payload: WsError,
    },

    /// Liveness reply.
    Pong,

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

// =============================================================================
// DESTINATIONS
// =============================================================================

/// Broadcast topic for one game's state updates.
pub fn game_topic(game_id: &GameId) -> String {
    format!("/topic/game/{game_id}")
}

/// Per-user queue delivering match notifications.
pub const MATCH_FOUND_QUEUE: &str = "/user/queue/match-found";

/// Per-user queue delivering errors to the offending connection.
pub const ERROR_QUEUE: &str = "/user/queue/errors";

/// A parsed subscribable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// `/topic/game/{gameId}`.
    GameTopic(GameId),
    /// `/user/queue/match-found`.
    MatchFoundQueue,
    /// `/user/queue/errors`.
    ErrorQueue,
}

impl Destination {
    /// Parse a subscription destination.
    pub fn parse(path: &str) -> Option<Self> {
        if path == MATCH_FOUND_QUEUE {
            return Some(Destination::MatchFoundQueue);
        }
        if path == ERROR_QUEUE {
            return Some(Destination::ErrorQueue);
        }
        let id = path.strip_prefix("/topic/game/")?;
        Uuid::parse_str(id).ok().map(Destination::GameTopic)
    }
}

/// A parsed ingress destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppDestination {
    /// `/app/game/{gameId}/move` with a `MovePayload`.
    Move(GameId),
    /// `/app/game/{gameId}/forfeit`, empty payload.
    Forfeit(GameId),
}

impl AppDestination {
    /// Parse a SEND destination.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix("/app/game/")?;
        if let Some(id) = rest.strip_suffix("/move") {
            return Uuid::parse_str(id).ok().map(AppDestination::Move);
        }
        if let Some(id) = rest.strip_suffix("/forfeit") {
            return Uuid::parse_str(id).ok().map(AppDestination::Forfeit);
        }
        None
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error codes surfaced on the error queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed frame or payload.
    InvalidInput,
    /// Position out of bounds or occupied.
    InvalidMove,
    /// Current-player mismatch.
    NotYourTurn,
    /// Missing/invalid token or non-participant.
    Unauthorized,
    /// Unknown game id.
    GameNotFound,
    /// Terminal-state mutation attempt.
    GameCompleted,
    /// Anything else.
    InternalError,
}

/// Error envelope delivered on `/user/queue/errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsError {
    /// Machine-readable code.
    pub error_code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Originating error kind, for client diagnostics.
    pub exception_type: String,
}

impl WsError {
    /// Build an envelope.
    pub fn new(error_code: ErrorCode, message: impl Into<String>, exception_type: &str) -> Self {
        Self {
            error_code,
            message: message.into(),
            exception_type: exception_type.to_string(),
        }
    }

    /// Envelope for an unauthenticated or unauthorized actor.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message, "AuthError")
    }

    /// Envelope for a malformed frame.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message, "FrameError")
    }
}

impl From<&GameError> for WsError {
    fn from(err: &GameError) -> Self {
        let code = match err {
            GameError::GameCompleted => ErrorCode::GameCompleted,
            GameError::Unauthorized => ErrorCode::Unauthorized,
            GameError::NotYourTurn => ErrorCode::NotYourTurn,
            GameError::InvalidMove(_) => ErrorCode::InvalidMove,
        };
        Self::new(code, err.to_string(), "GameError")
    }
}

impl From<&StoreError> for WsError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound => {
                Self::new(ErrorCode::GameNotFound, err.to_string(), "StoreError")
            }
            StoreError::Game(game) => Self::from(game),
            StoreError::AlreadyExists => {
                Self::new(ErrorCode::InternalError, err.to_string(), "StoreError")
            }
        }
    }
}

impl From<&AuthError> for WsError {
    fn from(err: &AuthError) -> Self {
        Self::unauthorized(err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientFrame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerFrame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// A MESSAGE frame for a destination.
    pub fn message<T: Serialize>(
        destination: String,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(ServerFrame::Message {
            destination,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// An ERROR frame addressed to the connection's error queue.
    pub fn error(payload: WsError) -> Self {
        ServerFrame::Error {
            destination: ERROR_QUEUE.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame_roundtrip() {
        let frame = ClientFrame::Connect {
            authorization: Some("Bearer abc".into()),
            token: None,
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"frame\":\"CONNECT\""));
        let parsed = ClientFrame::from_json(&json).unwrap();
        if let ClientFrame::Connect { authorization, .. } = parsed {
            assert_eq!(authorization.as_deref(), Some("Bearer abc"));
        } else {
            panic!("wrong frame type");
        }
    }

    #[test]
    fn test_send_frame_with_move_payload() {
        let json = r#"{"frame":"SEND","destination":"/app/game/00000000-0000-0000-0000-000000000001/move","payload":{"row":7,"col":8}}"#;
        let parsed = ClientFrame::from_json(json).unwrap();
        if let ClientFrame::Send { destination, payload } = parsed {
            assert_eq!(AppDestination::parse(&destination).unwrap(), {
                AppDestination::Move(Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap())
            });
            let mv: MovePayload = serde_json::from_value(payload).unwrap();
            assert_eq!((mv.row, mv.col), (7, 8));
        } else {
            panic!("wrong frame type");
        }
    }

    #[test]
    fn test_send_frame_defaults_payload() {
        let json = r#"{"frame":"SEND","destination":"/app/game/00000000-0000-0000-0000-000000000001/forfeit"}"#;
        let parsed = ClientFrame::from_json(json).unwrap();
        assert!(matches!(parsed, ClientFrame::Send { .. }));
    }

    #[test]
    fn test_destination_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(
            Destination::parse(&format!("/topic/game/{id}")),
            Some(Destination::GameTopic(id))
        );
        assert_eq!(
            Destination::parse("/user/queue/match-found"),
            Some(Destination::MatchFoundQueue)
        );
        assert_eq!(Destination::parse("/user/queue/errors"), Some(Destination::ErrorQueue));
        assert_eq!(Destination::parse("/topic/game/not-a-uuid"), None);
        assert_eq!(Destination::parse("/topic/other"), None);
    }

    #[test]
    fn test_app_destination_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(
            AppDestination::parse(&format!("/app/game/{id}/move")),
            Some(AppDestination::Move(id))
        );
        assert_eq!(
            AppDestination::parse(&format!("/app/game/{id}/forfeit")),
            Some(AppDestination::Forfeit(id))
        );
        assert_eq!(AppDestination::parse(&format!("/app/game/{id}/other")), None);
        assert_eq!(AppDestination::parse("/app/game/nope/move"), None);
    }

    #[test]
    fn test_error_frame_envelope() {
        let frame = ServerFrame::error(WsError::new(
            ErrorCode::InvalidMove,
            "position (7, 7) is occupied",
            "GameError",
        ));
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"frame\":\"ERROR\""));
        assert!(json.contains("\"destination\":\"/user/queue/errors\""));
        assert!(json.contains("\"errorCode\":\"INVALID_MOVE\""));
        assert!(json.contains("\"exceptionType\":\"GameError\""));
    }

    #[test]
    fn test_game_error_mapping() {
        let cases = [
            (GameError::GameCompleted, ErrorCode::GameCompleted),
            (GameError::Unauthorized, ErrorCode::Unauthorized),
            (GameError::NotYourTurn, ErrorCode::NotYourTurn),
            (GameError::InvalidMove("x".into()), ErrorCode::InvalidMove),
        ];
        for (err, code) in cases {
            assert_eq!(WsError::from(&err).error_code, code);
        }
    }

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            WsError::from(&StoreError::NotFound).error_code,
            ErrorCode::GameNotFound
        );
        assert_eq!(
            WsError::from(&StoreError::Game(GameError::NotYourTurn)).error_code,
            ErrorCode::NotYourTurn
        );
    }

    #[test]
    fn test_game_topic_format() {
        let id = Uuid::new_v4();
        assert_eq!(game_topic(&id), format!("/topic/game/{id}"));
    }

    #[test]
    fn test_message_frame_carries_payload() {
        let frame = ServerFrame::message("/topic/game/x".to_string(), &serde_json::json!({"a": 1}))
            .unwrap();
        let json = frame.to_json().unwrap();
        assert!(json.contains("\"frame\":\"MESSAGE\""));
        assert!(json.contains("\"a\":1"));
    }

    #[test]
    fn test_ping_pong() {
        let parsed = ClientFrame::from_json(r#"{"frame":"PING"}"#).unwrap();
        assert!(matches!(parsed, ClientFrame::Ping));
        let json = ServerFrame::Pong.to_json().unwrap();
        assert!(json.contains("\"PONG\""));
    }
}

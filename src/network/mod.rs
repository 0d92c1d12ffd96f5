//! Delivery Layer
//!
//! WebSocket gateway for real-time play. This layer is transport only;
//! all game logic runs through `game/` via the play service.

pub mod auth;
pub mod broadcaster;
pub mod match_feed;
pub mod protocol;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use broadcaster::{Broadcaster, ConnId};
pub use match_feed::MatchFeed;
pub use protocol::{
    AppDestination, ClientFrame, Destination, ErrorCode, MovePayload, ServerFrame, WsError,
};
pub use server::{WsServer, WsServerConfig, WsServerError};

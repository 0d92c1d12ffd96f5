//! # Gomoku Server
//!
//! Real-time session and matchmaking core for five-in-a-row: two players
//! (or one player and an AI oracle) alternate stones on a 15x15 grid;
//! five in a row wins. Matchmaking is a strict-FIFO aggregation over an
//! append-only event log, live games are held in an in-memory
//! authoritative store, and every applied move is mirrored to the log
//! for analytics and history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       GOMOKU SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  game/          - Deterministic rules (no I/O)               │
//! │  ├── board.rs   - 15x15 grid, five-in-a-row scan             │
//! │  ├── session.rs - Live session state, client projection      │
//! │  └── rules.rs   - Legality, termination, forfeit             │
//! │                                                              │
//! │  store/         - Authoritative session store                │
//! │  └── session_store.rs - Per-game locks, TTL, janitor         │
//! │                                                              │
//! │  events/        - Append-only substrate                      │
//! │  ├── types.rs   - Queue / match / move envelopes             │
//! │  ├── log.rs     - Partitioned topics, segment recovery       │
//! │  └── producer.rs- Sync + shadow publish, dead-letter         │
//! │                                                              │
//! │  matchmaking/   - Event-sourced FIFO queue                   │
//! │  ├── state.rs   - Fold over queue events                     │
//! │  ├── store.rs   - Snapshot + changelog state store           │
//! │  └── aggregator.rs - Match emission, crash recovery          │
//! │                                                              │
//! │  network/       - Delivery layer                             │
//! │  ├── auth.rs    - Bearer-token validation                    │
//! │  ├── protocol.rs- Frame verbs and destinations               │
//! │  ├── broadcaster.rs - Topics, user queues, slow consumers    │
//! │  ├── server.rs  - WebSocket gateway                          │
//! │  └── match_feed.rs - Pairings -> sessions + notices          │
//! │                                                              │
//! │  http/          - REST surface (warp)                        │
//! │  ai.rs          - Move oracle client (30 s, no retry)        │
//! │  play.rs        - Shared move/forfeit flow                   │
//! │  persistence/   - Durable game history tail                  │
//! │  stats.rs       - Elo updates on terminal moves              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantees
//!
//! - All mutation of one game serializes through its store lock, and
//!   broadcasts are issued inside that critical section: the per-game
//!   topic delivers a total order matching the state history.
//! - All queue events share one partition under a constant key, so the
//!   matchmaking fold sees a total order and pairing is strict FIFO.
//! - Analytical mirrors ride a shadow path that never blocks play.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod ai;
pub mod config;
pub mod events;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod network;
pub mod persistence;
pub mod play;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use ai::{AiBridge, AiBridgeConfig, AiError};
pub use config::Config;
pub use events::{EventLog, EventProducer, GameMoveEvent, MatchCreatedEvent, QueueEvent};
pub use game::{Board, GameError, GameSession, GameStateView, BOARD_SIZE, MAX_MOVES, WIN_LENGTH};
pub use matchmaking::{MatchmakingAggregator, MatchmakingState};
pub use network::{Broadcaster, WsServer, WsServerConfig};
pub use play::PlayService;
pub use stats::StatsUpdater;
pub use store::SessionStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

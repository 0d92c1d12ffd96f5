//! Matchmaking Module
//!
//! The event-sourced FIFO queue: a fold over queue events, a durable
//! snapshot store, and the single-threaded aggregation loop that emits
//! matches.

pub mod aggregator;
pub mod state;
pub mod store;

pub use aggregator::{AggregatorError, MatchmakingAggregator};
pub use state::{MatchmakingState, WaitingEntry};
pub use store::{StateSnapshot, StateStore, StateStoreError};

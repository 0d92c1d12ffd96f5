//! Persistence Module
//!
//! The durable game history: a storage adapter boundary plus the
//! event-log tail that materializes it.

pub mod consumer;
pub mod storage;

pub use consumer::PersistenceConsumer;
pub use storage::{
    GameOutcome, GameRow, GameStore, InMemoryGameStore, MoveRow, PersistedStatus, StorageError,
};

//! Event Log Module
//!
//! The append-only substrate: durable topics, producer disciplines and
//! the envelope types every other component speaks.
//!
//! ## Module Structure
//!
//! - `types`: event envelopes and topic names
//! - `log`: embedded partitioned log with segment recovery
//! - `producer`: synchronous and shadow publish paths

pub mod log;
pub mod producer;
pub mod types;

// Re-export key types
pub use log::{EventLog, LogError, StoredRecord, Tail, TopicSpec};
pub use producer::EventProducer;
pub use types::{
    EventId, GameMoveEvent, MatchCreatedEvent, MatchSource, QueueAction, QueueEvent,
    QUEUE_PARTITION_KEY, TOPIC_DEAD_LETTER, TOPIC_GAME_MOVE, TOPIC_MATCH_CREATED,
    TOPIC_QUEUE_EVENTS,
};

//! Session Store Module
//!
//! The single synchronization point protecting the game invariants: all
//! mutation of a live session goes through `SessionStore::update_with`.

pub mod session_store;

pub use session_store::{SessionStore, StoreError, DEFAULT_SESSION_TTL};

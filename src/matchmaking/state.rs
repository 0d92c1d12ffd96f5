//! Matchmaking State
//!
//! The materialized aggregation over the queue-event stream: an
//! insertion-ordered waiting list, the `matched` reservation set that
//! guards against double-matching, and monotone counters. The fold is a
//! deterministic function of the event stream; replaying the stream
//! reconstructs identical state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::types::{QueueAction, QueueEvent};
use crate::game::session::UserId;

/// One waiting player, in insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaitingEntry {
    /// The player.
    pub player_id: UserId,
    /// Join time, taken from the join event.
    pub joined_at: DateTime<Utc>,
}

/// Aggregated queue state.
///
/// `matched` may reference players no longer in `waiting`: the
/// compensating `PLAYER_LEFT` for an emitted match is processed
/// asynchronously, and the reservation outliving the waiting entry is the
/// tolerated transient.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchmakingState {
    /// FIFO waiting list; insertion order is significant.
    waiting: Vec<WaitingEntry>,
    /// Players reserved for an emitted but not-yet-cleaned match.
    matched: BTreeSet<UserId>,
    /// Total join events folded.
    pub total_joined: u64,
    /// Total matches emitted.
    pub total_matches_created: u64,
}

impl MatchmakingState {
    /// Fold one queue event into the state.
    pub fn apply(&mut self, event: &QueueEvent) {
        match event.action {
            QueueAction::PlayerJoined => {
                if self.is_waiting(&event.player_id) || self.matched.contains(&event.player_id) {
                    return;
                }
                self.waiting.push(WaitingEntry {
                    player_id: event.player_id.clone(),
                    joined_at: event.at,
                });
                self.total_joined += 1;
            }
            QueueAction::PlayerLeft | QueueAction::PlayerTimeout => {
                self.waiting.retain(|e| e.player_id != event.player_id);
                self.matched.remove(&event.player_id);
            }
        }
    }

    /// The two FIFO-oldest waiting players without a reservation, if at
    /// least two such players exist.
    pub fn ready_pair(&self) -> Option<(WaitingEntry, WaitingEntry)> {
        let mut free = self
            .waiting
            .iter()
            .filter(|e| !self.matched.contains(&e.player_id));
        let first = free.next()?.clone();
        let second = free.next()?.clone();
        Some((first, second))
    }

    /// Reserve both players of an emitted match.
    pub fn mark_matched(&mut self, a: &UserId, b: &UserId) {
        self.matched.insert(a.clone());
        self.matched.insert(b.clone());
        self.total_matches_created += 1;
    }

    /// Whether a player has a waiting entry.
    pub fn is_waiting(&self, player_id: &UserId) -> bool {
        self.waiting.iter().any(|e| &e.player_id == player_id)
    }

    /// Number of waiting entries (reserved players included).
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Players currently reserved.
    pub fn matched_players(&self) -> impl Iterator<Item = &UserId> {
        self.matched.iter()
    }

    /// Whether any reservation is outstanding.
    pub fn has_reservations(&self) -> bool {
        !self.matched.is_empty()
    }
}

//! Matchmaking Aggregator
//!
//! Single-threaded consumer of the queue-events partition. Folds each
//! event into `MatchmakingState`, and whenever two unreserved players are
//! waiting, emits a match for the FIFO-oldest pair followed by two
//! compensating `PLAYER_LEFT` events through the normal event path. The
//! `matched` reservation set keeps the pair from being re-selected while
//! their cleanup is still in flight.
//!
//! Crash handling: the snapshot commits state and offset atomically.
//! A crash between the match publish and the cleanup publishes leaves the
//! pair reserved in the recovered state; recovery detects the leftover
//! reservations after catch-up and re-emits the compensating events
//! rather than waiting for traffic. A crash between a successful match
//! publish and the snapshot commit re-attempts the pair on replay
//! (at-least-once; downstream consumers key on game id).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::log::{EventLog, LogError, StoredRecord};
use crate::events::producer::EventProducer;
use crate::events::types::{MatchCreatedEvent, QueueEvent, TOPIC_QUEUE_EVENTS};
use crate::matchmaking::state::MatchmakingState;
use crate::matchmaking::store::{StateSnapshot, StateStore, StateStoreError};

/// Aggregator failures; any of these halt the loop so a restart recovers
/// from the changelog.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// Event log access failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// State store access failed.
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
}

/// The event-sourced matchmaking aggregator.
pub struct MatchmakingAggregator {
    log: Arc<EventLog>,
    producer: EventProducer,
    store: StateStore,
    state: MatchmakingState,
    /// Next queue-events offset to consume.
    next_offset: u64,
}

impl MatchmakingAggregator {
    /// Recover the aggregator from its snapshot (or start fresh).
    pub fn recover(
        log: Arc<EventLog>,
        producer: EventProducer,
        store: StateStore,
    ) -> Result<Self, AggregatorError> {
        let snapshot = store.load()?.unwrap_or_default();
        info!(
            offset = snapshot.next_offset,
            waiting = snapshot.state.waiting_len(),
            "matchmaking aggregator recovered"
        );
        Ok(Self {
            log,
            producer,
            store,
            state: snapshot.state,
            next_offset: snapshot.next_offset,
        })
    }

    /// Current folded state (read-only copy, for tests and diagnostics).
    pub fn state(&self) -> &MatchmakingState {
        &self.state
    }

    /// Next offset the loop will consume.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Process everything currently committed past our offset.
    pub async fn catch_up(&mut self) -> Result<usize, AggregatorError> {
        let backlog = self
            .log
            .read_from(TOPIC_QUEUE_EVENTS, 0, self.next_offset)
            .await?;
        let count = backlog.len();
        for record in backlog {
            self.process(&record).await?;
        }
        Ok(count)
    }

    /// After catch-up: any player still reserved had their compensating
    /// cleanup lost to a crash between publishes. Re-emit it explicitly.
    pub async fn reconcile_reservations(&mut self) -> Result<usize, AggregatorError> {
        let leftover: Vec<String> = self.state.matched_players().cloned().collect();
        for player_id in &leftover {
            warn!(player_id = %player_id, "re-emitting lost match cleanup after recovery");
            self.producer
                .publish_queue(&QueueEvent::left(player_id.clone()))
                .await?;
        }
        Ok(leftover.len())
    }

    /// Run the consume loop until shutdown. FIFO order is preserved by
    /// the single consumer on the single queue-events partition.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), AggregatorError> {
        // Catch up, then reconcile any crash leftovers before going live.
        let replayed = self.catch_up().await?;
        if replayed > 0 {
            info!(replayed, "aggregator replayed changelog backlog");
        }
        self.reconcile_reservations().await?;

        let mut tail = self
            .log
            .tail(TOPIC_QUEUE_EVENTS, 0, self.next_offset)
            .await?;
        for record in tail.backlog {
            self.process(&record).await?;
        }

        loop {
            tokio::select! {
                received = tail.live.recv() => {
                    match received {
                        Ok(record) => {
                            // The live feed can race our catch-up reads.
                            if record.offset < self.next_offset {
                                continue;
                            }
                            self.process(&record).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "aggregator lagged; re-reading from committed offset");
                            tail = self
                                .log
                                .tail(TOPIC_QUEUE_EVENTS, 0, self.next_offset)
                                .await?;
                            for record in tail.backlog.drain(..) {
                                self.process(&record).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("queue-events feed closed; aggregator stopping");
                            return Ok(());
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("aggregator shutting down; committing state");
                    self.commit()?;
                    return Ok(());
                }
            }
        }
    }

    /// Fold one record, emit any matches it enables, and commit the
    /// snapshot with the advanced offset.
    async fn process(&mut self, record: &StoredRecord) -> Result<(), AggregatorError> {
        let event: QueueEvent = record.decode()?;
        self.state.apply(&event);
        self.emit_ready_matches().await?;
        self.next_offset = record.offset + 1;
        self.commit()?;
        Ok(())
    }

    /// Emit matches while two unreserved players are waiting. The match
    /// publish is awaited so it precedes its cleanup events in the log.
    async fn emit_ready_matches(&mut self) -> Result<(), AggregatorError> {
        while let Some((first, second)) = self.state.ready_pair() {
            let game_id = Uuid::new_v4();
            let event = MatchCreatedEvent::from_queue(
                game_id,
                first.player_id.clone(),
                second.player_id.clone(),
            );

            self.producer.publish_match(&event).await?;
            self.state.mark_matched(&first.player_id, &second.player_id);
            info!(
                game_id = %game_id,
                player1 = %first.player_id,
                player2 = %second.player_id,
                "match created"
            );

            // Cleanup rides the normal event path; until it folds, the
            // reservations keep the pair out of ready_pair().
            self.producer
                .publish_queue(&QueueEvent::left(first.player_id.clone()))
                .await?;
            self.producer
                .publish_queue(&QueueEvent::left(second.player_id.clone()))
                .await?;
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StateStoreError> {
        self.store.commit(&StateSnapshot {
            state: self.state.clone(),
            next_offset: self.next_offset,
        })
    }
}

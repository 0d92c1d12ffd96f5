//! Persistence Consumer
//!
//! Independent tail of the event log: materializes match-created events
//! into game rows and move events into move rows, and closes the game
//! row when a move is terminal. Offsets advance only after the
//! materialization write succeeds, so redelivery is possible and every
//! write is idempotent by the row uniqueness rules.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::log::{EventLog, StoredRecord};
use crate::events::types::{
    GameMoveEvent, MatchCreatedEvent, TOPIC_GAME_MOVE, TOPIC_MATCH_CREATED,
};
use crate::game::board::{Board, MAX_MOVES};
use crate::game::session::{GameType, StoneColor, UserId, WinnerType};
use crate::persistence::storage::{
    GameOutcome, GameRow, GameStore, MoveRow, PersistedStatus, StorageError,
};

/// Delay before retrying a failed materialization write.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Event-driven writer of the durable game history.
pub struct PersistenceConsumer {
    log: Arc<EventLog>,
    store: Arc<dyn GameStore>,
}

impl PersistenceConsumer {
    /// Build a consumer over a log and a storage adapter.
    pub fn new(log: Arc<EventLog>, store: Arc<dyn GameStore>) -> Self {
        Self { log, store }
    }

    /// Spawn one tail task per partition of both topics.
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for topic in [TOPIC_MATCH_CREATED, TOPIC_GAME_MOVE] {
            let partitions = self.log.partition_count(topic).unwrap_or(0);
            for partition in 0..partitions {
                let consumer = self.clone();
                let shutdown_rx = shutdown.subscribe();
                handles.push(tokio::spawn(async move {
                    consumer.run_partition(topic, partition, shutdown_rx).await;
                }));
            }
        }
        handles
    }

    /// Tail one partition from the beginning. Idempotent writes make the
    /// from-zero replay safe after a restart.
    async fn run_partition(
        &self,
        topic: &'static str,
        partition: u32,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut next_offset = 0u64;
        let mut tail = match self.log.tail(topic, partition, next_offset).await {
            Ok(tail) => tail,
            Err(e) => {
                error!(topic, partition, "persistence tail failed to open: {e}");
                return;
            }
        };

        for record in std::mem::take(&mut tail.backlog) {
            self.process_until_written(topic, &record).await;
            next_offset = record.offset + 1;
        }

        loop {
            tokio::select! {
                received = tail.live.recv() => {
                    match received {
                        Ok(record) => {
                            if record.offset < next_offset {
                                continue;
                            }
                            self.process_until_written(topic, &record).await;
                            next_offset = record.offset + 1;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(topic, partition, missed, "persistence consumer lagged");
                            match self.log.tail(topic, partition, next_offset).await {
                                Ok(fresh) => {
                                    tail = fresh;
                                    for record in std::mem::take(&mut tail.backlog) {
                                        self.process_until_written(topic, &record).await;
                                        next_offset = record.offset + 1;
                                    }
                                }
                                Err(e) => {
                                    error!(topic, partition, "persistence re-tail failed: {e}");
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = shutdown.recv() => {
                    info!(topic, partition, "persistence consumer stopping");
                    return;
                }
            }
        }
    }

    /// The offset only advances after the write succeeds; a failing
    /// backend is retried in place.
    async fn process_until_written(&self, topic: &str, record: &StoredRecord) {
        loop {
            let result = match topic {
                TOPIC_MATCH_CREATED => match record.decode::<MatchCreatedEvent>() {
                    Ok(event) => self.handle_match_event(&event).await,
                    Err(e) => {
                        error!(topic, offset = record.offset, "undecodable record skipped: {e}");
                        return;
                    }
                },
                _ => match record.decode::<GameMoveEvent>() {
                    Ok(event) => self.handle_move_event(&event).await,
                    Err(e) => {
                        error!(topic, offset = record.offset, "undecodable record skipped: {e}");
                        return;
                    }
                },
            };

            match result {
                Ok(()) => return,
                Err(e) => {
                    warn!(topic, offset = record.offset, "materialization failed, retrying: {e}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Write the WAITING game row for a new match.
    pub(crate) async fn handle_match_event(
        &self,
        event: &MatchCreatedEvent,
    ) -> Result<(), StorageError> {
        let inserted = self
            .store
            .insert_game(GameRow {
                game_id: event.game_id,
                game_type: event.game_type,
                status: PersistedStatus::Waiting,
                player1_id: event.player1_id.clone(),
                player2_id: event.player2_id.clone(),
                ai_difficulty: event.ai_difficulty,
                source: event.source,
                winner_type: WinnerType::None,
                winner_id: None,
                final_board: None,
                created_at: event.at,
                ended_at: None,
            })
            .await?;
        if !inserted {
            debug!(game_id = %event.game_id, "duplicate match event ignored");
        }
        Ok(())
    }

    /// Write a move row; when the move is terminal, close the game row.
    pub(crate) async fn handle_move_event(&self, event: &GameMoveEvent) -> Result<(), StorageError> {
        let inserted = self
            .store
            .insert_move(MoveRow {
                game_id: event.game_id,
                move_number: event.move_number,
                actor_type: event.actor_type,
                player_id: event.player_id.clone(),
                row: event.row,
                col: event.col,
                stone_color: event.stone_color,
                took_ms: event.took_ms,
                at: event.at,
            })
            .await?;
        if !inserted {
            debug!(
                game_id = %event.game_id,
                move_number = event.move_number,
                "duplicate move event ignored"
            );
            return Ok(());
        }

        if let Some((winner_type, needs_game)) = Self::terminal_outcome(event) {
            let game = self.store.get_game(&event.game_id).await?;
            let Some(game) = game else {
                warn!(
                    game_id = %event.game_id,
                    "terminal move for unknown game; completion skipped"
                );
                return Ok(());
            };

            let (winner_type, winner_id) = if needs_game {
                Self::resolve_winner(&game, event.stone_color)
            } else {
                (winner_type, None)
            };

            self.store
                .complete_game(
                    &event.game_id,
                    GameOutcome {
                        winner_type,
                        winner_id,
                        final_board: event.board_after,
                        ended_at: event.at,
                    },
                )
                .await?;
            info!(game_id = %event.game_id, ?winner_type, "game row completed");
        }

        Ok(())
    }

    /// Recompute termination from the mirrored board: a five-in-a-row
    /// through the move wins, a 225th move without one draws. Returns the
    /// outcome plus whether the winner still needs resolving against the
    /// game row.
    fn terminal_outcome(event: &GameMoveEvent) -> Option<(WinnerType, bool)> {
        let board = Board::from_snapshot(&event.board_after);
        if board
            .winning_line_through(event.row as usize, event.col as usize)
            .is_some()
        {
            return Some((WinnerType::None, true));
        }
        if event.move_number == MAX_MOVES {
            return Some((WinnerType::Draw, false));
        }
        None
    }

    fn resolve_winner(game: &GameRow, stone: StoneColor) -> (WinnerType, Option<UserId>) {
        match stone {
            StoneColor::Black => (WinnerType::Player1, Some(game.player1_id.clone())),
            StoneColor::White => match game.game_type {
                GameType::HumanVsAi => (WinnerType::Ai, None),
                GameType::HumanVsHuman => (WinnerType::Player2, game.player2_id.clone()),
            },
        }
    }
}

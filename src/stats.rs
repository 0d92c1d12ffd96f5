//! Stats Updater
//!
//! Independent tail of the move topic that recomputes ratings when a
//! game reaches a terminal move. Elo-style update with a provisional
//! K-factor, draw splits, and counters for win streak and peak rating.
//! Human-vs-AI games touch only the human's counters.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::log::EventLog;
use crate::events::types::{GameMoveEvent, TOPIC_GAME_MOVE};
use crate::game::board::{Board, MAX_MOVES};
use crate::game::session::{GameId, GameType, StoneColor, UserId};
use crate::persistence::storage::GameStore;

/// Starting rating for an unseen player.
pub const DEFAULT_RATING: f64 = 1200.0;

/// Completed games below which the provisional K-factor applies.
pub const PROVISIONAL_GAMES: u32 = 30;

/// K-factor for provisional players.
pub const K_PROVISIONAL: f64 = 32.0;

/// K-factor for established players.
pub const K_ESTABLISHED: f64 = 16.0;

/// Per-player rating and counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    /// Current rating, floored at zero.
    pub rating: f64,
    /// Completed games counted.
    pub games_completed: u32,
    /// Wins.
    pub wins: u32,
    /// Losses.
    pub losses: u32,
    /// Draws.
    pub draws: u32,
    /// Consecutive wins; zeroed by a loss or draw.
    pub win_streak: u32,
    /// Highest rating reached.
    pub peak_rating: f64,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            rating: DEFAULT_RATING,
            games_completed: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            win_streak: 0,
            peak_rating: DEFAULT_RATING,
        }
    }
}

/// Outcome from one player's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
            Outcome::Draw => 0.5,
        }
    }
}

/// Elo expected score of `me` against `opponent`.
fn expected_score(me: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - me) / 400.0))
}

fn k_factor(games_completed: u32) -> f64 {
    if games_completed < PROVISIONAL_GAMES {
        K_PROVISIONAL
    } else {
        K_ESTABLISHED
    }
}

/// Rating updater over the move-event tail.
pub struct StatsUpdater {
    log: Arc<EventLog>,
    games: Arc<dyn GameStore>,
    stats: RwLock<HashMap<UserId, PlayerStats>>,
    /// Terminal games already applied (duplicate-delivery guard).
    applied: RwLock<HashSet<GameId>>,
}

impl StatsUpdater {
    /// Build an updater over a log and the game rows.
    pub fn new(log: Arc<EventLog>, games: Arc<dyn GameStore>) -> Self {
        Self {
            log,
            games,
            stats: RwLock::new(HashMap::new()),
            applied: RwLock::new(HashSet::new()),
        }
    }

    /// Current stats for a player (default for unseen players).
    pub async fn stats_for(&self, user_id: &str) -> PlayerStats {
        self.stats
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Spawn one tail task per move-topic partition.
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let partitions = self.log.partition_count(TOPIC_GAME_MOVE).unwrap_or(0);
        let mut handles = Vec::new();
        for partition in 0..partitions {
            let updater = self.clone();
            let shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                updater.run_partition(partition, shutdown_rx).await;
            }));
        }
        handles
    }

    async fn run_partition(&self, partition: u32, mut shutdown: broadcast::Receiver<()>) {
        let mut next_offset = 0u64;
        let mut tail = match self.log.tail(TOPIC_GAME_MOVE, partition, next_offset).await {
            Ok(tail) => tail,
            Err(e) => {
                error!(partition, "stats tail failed to open: {e}");
                return;
            }
        };

        for record in std::mem::take(&mut tail.backlog) {
            if let Ok(event) = record.decode::<GameMoveEvent>() {
                self.observe_move(&event).await;
            }
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
                            if let Ok(event) = record.decode::<GameMoveEvent>() {
                                self.observe_move(&event).await;
                            }
                            next_offset = record.offset + 1;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(partition, missed, "stats updater lagged");
                            match self.log.tail(TOPIC_GAME_MOVE, partition, next_offset).await {
                                Ok(fresh) => {
                                    tail = fresh;
                                    for record in std::mem::take(&mut tail.backlog) {
                                        if let Ok(event) = record.decode::<GameMoveEvent>() {
                                            self.observe_move(&event).await;
                                        }
                                        next_offset = record.offset + 1;
                                    }
                                }
                                Err(e) => {
                                    error!(partition, "stats re-tail failed: {e}");
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = shutdown.recv() => {
                    info!(partition, "stats updater stopping");
                    return;
                }
            }
        }
    }

    /// Apply a move event if it is terminal and unseen.
    pub(crate) async fn observe_move(&self, event: &GameMoveEvent) {
        let board = Board::from_snapshot(&event.board_after);
        let won = board
            .winning_line_through(event.row as usize, event.col as usize)
            .is_some();
        let draw = !won && event.move_number == MAX_MOVES;
        if !won && !draw {
            return;
        }

        {
            let mut applied = self.applied.write().await;
            if !applied.insert(event.game_id) {
                debug!(game_id = %event.game_id, "terminal event already applied");
                return;
            }
        }

        let game = match self.games.get_game(&event.game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => {
                warn!(game_id = %event.game_id, "terminal move for unknown game; ratings unchanged");
                return;
            }
            Err(e) => {
                warn!(game_id = %event.game_id, "game lookup failed: {e}");
                return;
            }
        };

        match game.game_type {
            GameType::HumanVsHuman => {
                let Some(player2) = game.player2_id.clone() else {
                    return;
                };
                let (p1_outcome, p2_outcome) = if draw {
                    (Outcome::Draw, Outcome::Draw)
                } else if event.stone_color == StoneColor::Black {
                    (Outcome::Win, Outcome::Loss)
                } else {
                    (Outcome::Loss, Outcome::Win)
                };
                self.apply_rated(&game.player1_id, &player2, p1_outcome, p2_outcome)
                    .await;
            }
            GameType::HumanVsAi => {
                let outcome = if draw {
                    Outcome::Draw
                } else if event.stone_color == StoneColor::Black {
                    Outcome::Win
                } else {
                    Outcome::Loss
                };
                self.apply_unrated(&game.player1_id, outcome).await;
            }
        }
    }

    /// Rated PvP update: both ratings move by the Elo delta.
    async fn apply_rated(&self, p1: &UserId, p2: &UserId, o1: Outcome, o2: Outcome) {
        let mut stats = self.stats.write().await;
        let s1 = stats.get(p1).cloned().unwrap_or_default();
        let s2 = stats.get(p2).cloned().unwrap_or_default();

        let e1 = expected_score(s1.rating, s2.rating);
        let e2 = expected_score(s2.rating, s1.rating);

        let mut n1 = s1.clone();
        let mut n2 = s2.clone();
        n1.rating = (s1.rating + k_factor(s1.games_completed) * (o1.score() - e1)).max(0.0);
        n2.rating = (s2.rating + k_factor(s2.games_completed) * (o2.score() - e2)).max(0.0);

        Self::bump_counters(&mut n1, o1);
        Self::bump_counters(&mut n2, o2);
        n1.peak_rating = n1.peak_rating.max(n1.rating);
        n2.peak_rating = n2.peak_rating.max(n2.rating);

        info!(
            player1 = %p1,
            player2 = %p2,
            rating1 = n1.rating,
            rating2 = n2.rating,
            "ratings updated"
        );
        stats.insert(p1.clone(), n1);
        stats.insert(p2.clone(), n2);
    }

    /// PvAI update: counters only, rating untouched.
    async fn apply_unrated(&self, player: &UserId, outcome: Outcome) {
        let mut stats = self.stats.write().await;
        let mut entry = stats.get(player).cloned().unwrap_or_default();
        Self::bump_counters(&mut entry, outcome);
        stats.insert(player.clone(), entry);
    }

    fn bump_counters(stats: &mut PlayerStats, outcome: Outcome) {
        stats.games_completed += 1;
        match outcome {
            Outcome::Win => {
                stats.wins += 1;
                stats.win_streak += 1;
            }
            Outcome::Loss => {
                stats.losses += 1;
                stats.win_streak = 0;
            }
            Outcome::Draw => {
                stats.draws += 1;
                stats.win_streak = 0;
            }
        }
    }
}

//! Session Store
//!
//! Holds the live sessions and serializes all mutation of a given game.
//! Each game gets its own mutex; there is no global write lock. A
//! maintenance pass evicts terminal sessions past their idle TTL and
//! abandons sessions whose players went silent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use std::future::Future;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::game::rules::{abandon_idle, GameError};
use crate::game::session::{GameId, GameSession, GameStateView};

/// Default idle horizon after which a session is eligible for eviction.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Store-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A session with this game id already exists.
    #[error("game already exists")]
    AlreadyExists,

    /// No session with this game id.
    #[error("game not found")]
    NotFound,

    /// The update closure rejected the mutation; nothing was written.
    #[error(transparent)]
    Game(#[from] GameError),
}

struct Entry {
    session: GameSession,
    /// Monotonic idle clock; reset on every committed write.
    touched: Instant,
}

/// In-memory authoritative store of live sessions.
pub struct SessionStore {
    entries: RwLock<HashMap<GameId, Arc<Mutex<Entry>>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store with the default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    /// Create a store with an explicit idle TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert a new session; fails if the game id is already present.
    pub async fn create(&self, session: GameSession) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&session.game_id) {
            return Err(StoreError::AlreadyExists);
        }
        debug!(game_id = %session.game_id, "session created");
        entries.insert(
            session.game_id,
            Arc::new(Mutex::new(Entry {
                session,
                touched: Instant::now(),
            })),
        );
        Ok(())
    }

    /// Read the committed state of a session.
    pub async fn get(&self, game_id: &GameId) -> Result<GameSession, StoreError> {
        let entry = self.entry(game_id).await?;
        let guard = entry.lock().await;
        Ok(guard.session.clone())
    }

    /// Apply `f` under the game's exclusive lock. The closure runs on a
    /// working copy: a returned error surfaces without mutating the
    /// stored session, a success commits the copy and refreshes the TTL.
    ///
    /// Two calls for the same game are strictly serialized; calls for
    /// different games run in parallel.
    pub async fn update_with<T, F>(&self, game_id: &GameId, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, GameError>,
    {
        let entry = self.entry(game_id).await?;
        let mut guard = entry.lock().await;

        let mut working = guard.session.clone();
        let out = f(&mut working)?;

        guard.session = working;
        guard.touched = Instant::now();
        Ok(out)
    }

    /// As `update_with`, but additionally runs `publish` on a copy of the
    /// committed session while the game lock is still held. Broadcasts
    /// issued here observe the mutation order, which makes the per-game
    /// topic a total order matching the state history.
    pub async fn update_with_then<T, F, G, Fut>(
        &self,
        game_id: &GameId,
        f: F,
        publish: G,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, GameError>,
        G: FnOnce(GameSession) -> Fut,
        Fut: Future<Output = ()>,
    {
        let entry = self.entry(game_id).await?;
        let mut guard = entry.lock().await;

        let mut working = guard.session.clone();
        let out = f(&mut working)?;

        guard.session = working;
        guard.touched = Instant::now();
        publish(guard.session.clone()).await;
        Ok(out)
    }

    /// Remove a session and its lock.
    pub async fn delete(&self, game_id: &GameId) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(game_id).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn entry(&self, game_id: &GameId) -> Result<Arc<Mutex<Entry>>, StoreError> {
        let entries = self.entries.read().await;
        entries.get(game_id).cloned().ok_or(StoreError::NotFound)
    }

    /// Evict terminal sessions idle past the TTL. Their terminal state
    /// was already mirrored to the log when they ended.
    pub async fn sweep_terminal(&self) -> Vec<GameId> {
        let handles: Vec<(GameId, Arc<Mutex<Entry>>)> = {
            let entries = self.entries.read().await;
            entries.iter().map(|(id, e)| (*id, e.clone())).collect()
        };

        let mut evicted = Vec::new();
        for (game_id, handle) in handles {
            let guard = handle.lock().await;
            if guard.session.status.is_terminal() && guard.touched.elapsed() >= self.ttl {
                evicted.push(game_id);
            }
        }

        if !evicted.is_empty() {
            let mut entries = self.entries.write().await;
            for game_id in &evicted {
                entries.remove(game_id);
            }
            info!(count = evicted.len(), "evicted idle terminal sessions");
        }
        evicted
    }

    /// Abandon non-terminal sessions idle past the TTL (janitor path).
    /// Returns the terminal views so the caller can broadcast them; the
    /// next sweep collects the entries.
    pub async fn abandon_idle_sessions(&self) -> Vec<GameStateView> {
        let handles: Vec<Arc<Mutex<Entry>>> = {
            let entries = self.entries.read().await;
            entries.values().cloned().collect()
        };

        let mut abandoned = Vec::new();
        for handle in handles {
            let mut guard = handle.lock().await;
            if !guard.session.status.is_terminal() && guard.touched.elapsed() >= self.ttl {
                if abandon_idle(&mut guard.session, Utc::now()) {
                    info!(game_id = %guard.session.game_id, "abandoned idle session");
                    abandoned.push(guard.session.view());
                }
            }
        }
        abandoned
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

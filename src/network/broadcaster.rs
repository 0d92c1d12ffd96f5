//! Outbound Broadcaster
//!
//! The subscriber table: per-game broadcast topics and per-user queues,
//! readable from all worker threads and mutated only by
//! connection-lifecycle events under a dedicated lock. Every connection
//! has a bounded outbound buffer; a subscriber whose buffer is full is
//! disconnected rather than back-pressuring the publisher.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::session::{GameId, GameStateView, UserId};
use crate::network::protocol::{game_topic, ServerFrame};

/// Unique connection identifier.
pub type ConnId = Uuid;

struct Connection {
    principal: Option<UserId>,
    tx: mpsc::Sender<ServerFrame>,
    close: mpsc::Sender<()>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnId, Connection>,
    game_subs: HashMap<GameId, HashSet<ConnId>>,
    user_conns: HashMap<UserId, HashSet<ConnId>>,
}

/// Topic and queue fan-out over live connections.
#[derive(Default)]
pub struct Broadcaster {
    inner: RwLock<Inner>,
}

impl Broadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with its outbound channel and close signal.
    pub async fn register(&self, conn_id: ConnId, tx: mpsc::Sender<ServerFrame>, close: mpsc::Sender<()>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            Connection {
                principal: None,
                tx,
                close,
            },
        );
    }

    /// Bind an authenticated principal to a connection, enabling its
    /// per-user queues.
    pub async fn bind_principal(&self, conn_id: &ConnId, user_id: UserId) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(conn_id) {
            conn.principal = Some(user_id.clone());
            inner.user_conns.entry(user_id).or_default().insert(*conn_id);
        }
    }

    /// Subscribe a connection to a game topic.
    pub async fn subscribe_game(&self, conn_id: &ConnId, game_id: GameId) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn_id) {
            return false;
        }
        inner.game_subs.entry(game_id).or_default().insert(*conn_id);
        true
    }

    /// Release one game subscription.
    pub async fn unsubscribe_game(&self, conn_id: &ConnId, game_id: &GameId) {
        let mut inner = self.inner.write().await;
        if let Some(subs) = inner.game_subs.get_mut(game_id) {
            subs.remove(conn_id);
            if subs.is_empty() {
                inner.game_subs.remove(game_id);
            }
        }
    }

    /// Remove a connection and all its subscriptions.
    pub async fn unregister(&self, conn_id: &ConnId) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.remove(conn_id) {
            if let Some(user_id) = conn.principal {
                if let Some(conns) = inner.user_conns.get_mut(&user_id) {
                    conns.remove(conn_id);
                    if conns.is_empty() {
                        inner.user_conns.remove(&user_id);
                    }
                }
            }
        }
        for subs in inner.game_subs.values_mut() {
            subs.remove(conn_id);
        }
        inner.game_subs.retain(|_, subs| !subs.is_empty());
    }

    /// Broadcast a game state update to every live subscriber of the
    /// game's topic. Subscribers whose buffers are full are disconnected.
    pub async fn broadcast_game(&self, game_id: &GameId, view: &GameStateView) {
        let frame = match ServerFrame::message(game_topic(game_id), view) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(game_id = %game_id, "unserializable state view: {e}");
                return;
            }
        };

        let targets: Vec<ConnId> = {
            let inner = self.inner.read().await;
            match inner.game_subs.get(game_id) {
                Some(subs) => subs.iter().copied().collect(),
                None => return,
            }
        };

        let mut stale = Vec::new();
        {
            let inner = self.inner.read().await;
            for conn_id in targets {
                if let Some(conn) = inner.connections.get(&conn_id) {
                    if let Err(e) = conn.tx.try_send(frame.clone()) {
                        match e {
                            mpsc::error::TrySendError::Full(_) => {
                                warn!(%conn_id, "slow subscriber; disconnecting");
                                let _ = conn.close.try_send(());
                            }
                            mpsc::error::TrySendError::Closed(_) => {}
                        }
                        stale.push(conn_id);
                    }
                }
            }
        }

        for conn_id in stale {
            self.unregister(&conn_id).await;
        }
    }

    /// Deliver a frame to every connection bound to a user (the per-user
    /// queue). Returns the number of connections reached.
    pub async fn send_to_user(&self, user_id: &UserId, frame: ServerFrame) -> usize {
        let targets: Vec<ConnId> = {
            let inner = self.inner.read().await;
            match inner.user_conns.get(user_id) {
                Some(conns) => conns.iter().copied().collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut stale = Vec::new();
        {
            let inner = self.inner.read().await;
            for conn_id in targets {
                if let Some(conn) = inner.connections.get(&conn_id) {
                    match conn.tx.try_send(frame.clone()) {
                        Ok(()) => delivered += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(%conn_id, user_id = %user_id, "slow user queue; disconnecting");
                            let _ = conn.close.try_send(());
                            stale.push(conn_id);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => stale.push(conn_id),
                    }
                }
            }
        }
        for conn_id in stale {
            self.unregister(&conn_id).await;
        }

        debug!(user_id = %user_id, delivered, "user queue delivery");
        delivered
    }

    /// Deliver a frame to one connection only (error path).
    pub async fn send_to_conn(&self, conn_id: &ConnId, frame: ServerFrame) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(conn_id) {
            Some(conn) => conn.tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Number of subscribers on one game topic.
    pub async fn game_subscriber_count(&self, game_id: &GameId) -> usize {
        self.inner
            .read()
            .await
            .game_subs
            .get(game_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

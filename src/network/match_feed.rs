//! Match Feed
//!
//! Tail of the match-created topic that turns aggregator pairings into
//! live sessions and pushes the match notice to both players' queues.
//! Subscribes from the current end of each partition: historical matches
//! belong to the persistence consumer, not to the live session store.
//! REST-created games (direct challenge, AI) already have their session
//! and are skipped here.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::log::EventLog;
use crate::events::types::{MatchCreatedEvent, MatchSource, TOPIC_MATCH_CREATED};
use crate::play::PlayService;

/// Bridges emitted matches into the session store and user queues.
pub struct MatchFeed {
    log: Arc<EventLog>,
    play: Arc<PlayService>,
}

impl MatchFeed {
    /// Build a feed.
    pub fn new(log: Arc<EventLog>, play: Arc<PlayService>) -> Self {
        Self { log, play }
    }

    /// Spawn one tail task per match-created partition.
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let partitions = self.log.partition_count(TOPIC_MATCH_CREATED).unwrap_or(0);
        let mut handles = Vec::new();
        for partition in 0..partitions {
            let feed = self.clone();
            let shutdown_rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                feed.run_partition(partition, shutdown_rx).await;
            }));
        }
        handles
    }

    async fn run_partition(&self, partition: u32, mut shutdown: broadcast::Receiver<()>) {
        // Live records only; history is not replayed into the store.
        let start = match self.log.end_offset(TOPIC_MATCH_CREATED, partition).await {
            Ok(offset) => offset,
            Err(e) => {
                error!(partition, "match feed failed to read end offset: {e}");
                return;
            }
        };
        let mut tail = match self.log.tail(TOPIC_MATCH_CREATED, partition, start).await {
            Ok(tail) => tail,
            Err(e) => {
                error!(partition, "match feed failed to open: {e}");
                return;
            }
        };
        let mut next_offset = start;
        for record in std::mem::take(&mut tail.backlog) {
            if let Ok(event) = record.decode::<MatchCreatedEvent>() {
                self.handle_event(&event).await;
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
                            next_offset = record.offset + 1;
                            match record.decode::<MatchCreatedEvent>() {
                                Ok(event) => self.handle_event(&event).await,
                                Err(e) => warn!(partition, "undecodable match record: {e}"),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(partition, missed, "match feed lagged");
                            match self.log.tail(TOPIC_MATCH_CREATED, partition, next_offset).await {
                                Ok(fresh) => {
                                    tail = fresh;
                                    for record in std::mem::take(&mut tail.backlog) {
                                        if let Ok(event) = record.decode::<MatchCreatedEvent>() {
                                            self.handle_event(&event).await;
                                        }
                                        next_offset = record.offset + 1;
                                    }
                                }
                                Err(e) => {
                                    error!(partition, "match feed re-tail failed: {e}");
                                    return;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                _ = shutdown.recv() => {
                    info!(partition, "match feed stopping");
                    return;
                }
            }
        }
    }

    /// Materialize one queue pairing.
    pub(crate) async fn handle_event(&self, event: &MatchCreatedEvent) {
        if event.source != MatchSource::Matchmaking {
            return;
        }

        match self.play.create_from_match(event).await {
            Ok(created) => {
                if created {
                    info!(
                        game_id = %event.game_id,
                        player1 = %event.player1_id,
                        "session materialized for match"
                    );
                }
                self.play.notify_match_found(event).await;
            }
            Err(e) => {
                error!(game_id = %event.game_id, "session creation failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiBridge, AiBridgeConfig};
    use crate::events::log::TopicSpec;
    use crate::events::producer::EventProducer;
    use crate::events::types::{TOPIC_GAME_MOVE, TOPIC_QUEUE_EVENTS};
    use crate::network::broadcaster::Broadcaster;
    use crate::network::protocol::ServerFrame;
    use crate::persistence::storage::{GameStore, InMemoryGameStore};
    use crate::store::session_store::SessionStore;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        feed: Arc<MatchFeed>,
        play: Arc<PlayService>,
        store: Arc<SessionStore>,
        broadcaster: Arc<Broadcaster>,
        producer: EventProducer,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(
            EventLog::open(
                dir.path(),
                vec![
                    TopicSpec::new(TOPIC_QUEUE_EVENTS, 1, ChronoDuration::days(7)),
                    TopicSpec::new(TOPIC_MATCH_CREATED, 3, ChronoDuration::days(7)),
                    TopicSpec::new(TOPIC_GAME_MOVE, 3, ChronoDuration::days(7)),
                ],
            )
            .unwrap(),
        );
        let store = Arc::new(SessionStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let play = Arc::new(PlayService::new(
            store.clone(),
            broadcaster.clone(),
            EventProducer::new(log.clone()),
            Arc::new(AiBridge::new(AiBridgeConfig::default())),
            Arc::new(InMemoryGameStore::new()) as Arc<dyn GameStore>,
        ));
        Fixture {
            feed: Arc::new(MatchFeed::new(log.clone(), play.clone())),
            play,
            store,
            broadcaster,
            producer: EventProducer::new(log),
            _dir: dir,
        }
    }

    async fn bind_user(fx: &Fixture, user: &str) -> mpsc::Receiver<ServerFrame> {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        let (close_tx, _close_rx) = mpsc::channel(1);
        fx.broadcaster.register(conn_id, tx, close_tx).await;
        fx.broadcaster.bind_principal(&conn_id, user.into()).await;
        rx
    }

    #[tokio::test]
    async fn test_pairing_creates_session_and_notifies() {
        let fx = fixture();
        let mut rx_a = bind_user(&fx, "alice").await;
        let mut rx_b = bind_user(&fx, "bob").await;

        let event = MatchCreatedEvent::from_queue(Uuid::new_v4(), "alice".into(), "bob".into());
        fx.feed.handle_event(&event).await;

        let session = fx.store.get(&event.game_id).await.unwrap();
        assert_eq!(session.player1_id, "alice");
        assert_eq!(session.player2_id.as_deref(), Some("bob"));

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await.unwrap() {
                ServerFrame::Message { payload, .. } => {
                    assert_eq!(payload["gameId"], serde_json::json!(event.game_id));
                }
                other => panic!("expected MESSAGE, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_redelivery_notifies_without_recreating() {
        let fx = fixture();
        let mut rx_a = bind_user(&fx, "alice").await;

        let event = MatchCreatedEvent::from_queue(Uuid::new_v4(), "alice".into(), "bob".into());
        fx.feed.handle_event(&event).await;
        fx.feed.handle_event(&event).await;

        assert_eq!(fx.store.len().await, 1);
        // Both deliveries pushed a notice; duplicates are for the client
        // to collapse by game id.
        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_rest_created_games_skipped() {
        let fx = fixture();
        let event = MatchCreatedEvent::direct(Uuid::new_v4(), "alice".into(), "bob".into());
        fx.feed.handle_event(&event).await;
        assert!(fx.store.get(&event.game_id).await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_feed_skips_history_processes_live() {
        let fx = fixture();

        // A match already in the log before the feed starts.
        let old = MatchCreatedEvent::from_queue(Uuid::new_v4(), "old1".into(), "old2".into());
        fx.producer.publish_match(&old).await.unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = fx.feed.spawn(&shutdown_tx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Old match produced no session.
        assert!(fx.store.get(&old.game_id).await.is_err());

        let fresh = MatchCreatedEvent::from_queue(Uuid::new_v4(), "alice".into(), "bob".into());
        fx.producer.publish_match(&fresh).await.unwrap();

        for _ in 0..100 {
            if fx.store.get(&fresh.game_id).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fx.store.get(&fresh.game_id).await.is_ok());

        let _ = shutdown_tx.send(());
        for handle in handles {
            let _ = handle.await;
        }
        // Play service kept alive for the whole test.
        drop(fx.play);
    }
}

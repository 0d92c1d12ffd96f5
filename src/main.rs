//! Gomoku Server binary
//!
//! Wires the event log, session store, matchmaking aggregator, delivery
//! layer, REST surface and the event-log tails, then runs until a
//! shutdown signal. Shutdown drains in order: stop accepting, drain
//! inbound, flush producers, commit the aggregator state, close
//! connections.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gomoku::ai::{AiBridge, AiBridgeConfig};
use gomoku::config::Config;
use gomoku::events::{EventLog, EventProducer};
use gomoku::http::{self, ApiContext};
use gomoku::matchmaking::{MatchmakingAggregator, StateStore};
use gomoku::network::auth::AuthConfig;
use gomoku::network::match_feed::MatchFeed;
use gomoku::network::{Broadcaster, WsServer, WsServerConfig};
use gomoku::persistence::{GameStore, InMemoryGameStore, PersistenceConsumer};
use gomoku::play::PlayService;
use gomoku::stats::StatsUpdater;
use gomoku::store::SessionStore;
use gomoku::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("no JWT secret or public key configured; all connections stay unauthenticated");
    }

    info!("Gomoku Server v{}", VERSION);
    info!("event data dir: {}", config.event_data_dir.display());
    info!("aggregator state dir: {}", config.state_dir.display());

    // Substrate first: topics must exist before any producer or tail.
    let log = Arc::new(
        EventLog::open(&config.event_data_dir, config.topic_specs())
            .context("opening event log")?,
    );
    let producer = EventProducer::new(log.clone());

    let store = Arc::new(SessionStore::with_ttl(config.session_ttl));
    let broadcaster = Arc::new(Broadcaster::new());
    let games: Arc<dyn GameStore> = Arc::new(InMemoryGameStore::new());
    let ai = Arc::new(AiBridge::new(AiBridgeConfig {
        base_url: config.ai_service_url.clone(),
        timeout: config.ai_timeout,
    }));
    let play = Arc::new(PlayService::new(
        store.clone(),
        broadcaster.clone(),
        producer.clone(),
        ai,
        games.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut task_handles = Vec::new();

    // Tails subscribe before the aggregator runs so recovery-time
    // emissions are observed live.
    let match_feed = Arc::new(MatchFeed::new(log.clone(), play.clone()));
    task_handles.extend(match_feed.spawn(&shutdown_tx));

    let persistence = Arc::new(PersistenceConsumer::new(log.clone(), games.clone()));
    task_handles.extend(persistence.spawn(&shutdown_tx));

    let stats = Arc::new(StatsUpdater::new(log.clone(), games.clone()));
    task_handles.extend(stats.spawn(&shutdown_tx));

    // Matchmaking aggregator: recover, then consume.
    let state_store = StateStore::open(&config.state_dir).context("opening state store")?;
    let aggregator = MatchmakingAggregator::recover(log.clone(), producer.clone(), state_store)
        .context("recovering matchmaking aggregator")?;
    let aggregator_handle = tokio::spawn({
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            if let Err(e) = aggregator.run(shutdown_rx).await {
                error!("matchmaking aggregator halted: {e}");
            }
        }
    });

    // Janitor, sweeper and retention on one cadence.
    task_handles.push(tokio::spawn({
        let play = play.clone();
        let log = log.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let period = config.maintenance_interval;
        async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        play.maintenance_pass().await;
                        if let Err(e) = log.enforce_retention().await {
                            warn!("retention sweep failed: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
    }));

    // REST surface.
    let routes = http::routes(ApiContext {
        play: play.clone(),
        producer: producer.clone(),
        auth: auth.clone(),
    });
    let (http_addr, http_server) = warp::serve(routes).bind_with_graceful_shutdown(
        config.http_addr,
        {
            let mut shutdown_rx = shutdown_tx.subscribe();
            async move {
                let _ = shutdown_rx.recv().await;
            }
        },
    );
    info!("http api listening on {http_addr}");
    let http_handle = tokio::spawn(http_server);

    // WebSocket gateway.
    let ws_server = Arc::new(WsServer::new(
        WsServerConfig {
            bind_addr: config.ws_addr,
            ..Default::default()
        },
        auth,
        play.clone(),
        broadcaster.clone(),
    ));
    let ws_handle = tokio::spawn({
        let ws_server = ws_server.clone();
        async move {
            if let Err(e) = ws_server.run().await {
                error!("websocket gateway failed: {e}");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");

    // Stop accepting and close connections; then stop the loops. The
    // aggregator commits its snapshot on the way out.
    ws_server.shutdown();
    let _ = shutdown_tx.send(());

    let _ = aggregator_handle.await;
    for handle in task_handles {
        let _ = handle.await;
    }
    let _ = ws_handle.await;
    let _ = http_handle.await;

    // Let in-flight shadow publishes reach the log.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    info!("shutdown complete");
    Ok(())
}

//! WebSocket Gateway
//!
//! The `/ws` endpoint: accepts connections, authenticates CONNECT frames
//! against the auth provider, dispatches SUBSCRIBE/SEND frames, and owns
//! each connection's outbound pump. Ingress operations run through the
//! play service; errors go only to the offending connection's error
//! queue.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::session::UserId;
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::broadcaster::{Broadcaster, ConnId};
use crate::network::protocol::{
    AppDestination, ClientFrame, Destination, MovePayload, ServerFrame, WsError,
};
use crate::play::PlayService;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound buffer; a full buffer disconnects the
    /// subscriber.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".parse().expect("static addr"),
            max_connections: 1000,
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The WebSocket gateway.
pub struct WsServer {
    config: WsServerConfig,
    auth: AuthConfig,
    play: Arc<PlayService>,
    broadcaster: Arc<Broadcaster>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WsServer {
    /// Create a gateway.
    pub fn new(
        config: WsServerConfig,
        auth: AuthConfig,
        play: Arc<PlayService>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            auth,
            play,
            broadcaster,
            shutdown_tx,
        }
    }

    /// Signal all connections and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<(), WsServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("websocket gateway listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an existing listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), WsServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.broadcaster.connection_count().await >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("gateway shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Spawn the connection task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let auth = self.auth.clone();
        let play = self.play.clone();
        let broadcaster = self.broadcaster.clone();
        let version = self.config.version.clone();
        let buffer = self.config.outbound_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("websocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let conn_id: ConnId = Uuid::new_v4();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(buffer);
            let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

            broadcaster.register(conn_id, frame_tx.clone(), close_tx).await;

            // Outbound pump.
            let sender_task = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    let text = match frame.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("unserializable frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut principal: Option<UserId> = None;

            loop {
                tokio::select! {
                    incoming = ws_receiver.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let frame = match ClientFrame::from_json(&text) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        debug!("invalid frame from {}: {}", addr, e);
                                        let _ = broadcaster
                                            .send_to_conn(
                                                &conn_id,
                                                ServerFrame::error(WsError::invalid_input(
                                                    "invalid frame format",
                                                )),
                                            )
                                            .await;
                                        continue;
                                    }
                                };
                                Self::handle_frame(
                                    &conn_id,
                                    &mut principal,
                                    frame,
                                    &auth,
                                    &play,
                                    &broadcaster,
                                    &version,
                                )
                                .await;
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                // Handled at the frame layer; tungstenite
                                // answers transport pings itself, payload
                                // ignored here.
                                let _ = payload;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = close_rx.recv() => {
                        // Broadcaster dropped us as a slow consumer.
                        warn!("closing slow connection {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = frame_tx.send(ServerFrame::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            broadcaster.unregister(&conn_id).await;
            debug!("connection {} cleaned up", addr);
        });
    }

    /// Dispatch one client frame.
    async fn handle_frame(
        conn_id: &ConnId,
        principal: &mut Option<UserId>,
        frame: ClientFrame,
        auth: &AuthConfig,
        play: &Arc<PlayService>,
        broadcaster: &Arc<Broadcaster>,
        version: &str,
    ) {
        match frame {
            ClientFrame::Connect {
                authorization,
                token,
            } => {
                // A failed validation still connects; the session simply
                // has no principal and authenticated frames get rejected.
                match authenticate(authorization.as_deref(), token.as_deref(), auth) {
                    Ok(user) => {
                        debug!(user_id = %user, "connection authenticated");
                        *principal = Some(user.clone());
                        broadcaster.bind_principal(conn_id, user.clone()).await;
                        let _ = broadcaster
                            .send_to_conn(
                                conn_id,
                                ServerFrame::Connected {
                                    principal: Some(user),
                                    server_version: version.to_string(),
                                },
                            )
                            .await;
                    }
                    Err(e) => {
                        debug!("connect without principal: {}", e);
                        let _ = broadcaster
                            .send_to_conn(
                                conn_id,
                                ServerFrame::Connected {
                                    principal: None,
                                    server_version: version.to_string(),
                                },
                            )
                            .await;
                    }
                }
            }

            ClientFrame::Subscribe { destination } => match Destination::parse(&destination) {
                Some(Destination::GameTopic(game_id)) => {
                    broadcaster.subscribe_game(conn_id, game_id).await;
                }
                // Per-user queues are implicit once a principal is bound.
                Some(_) => {}
                None => {
                    let _ = broadcaster
                        .send_to_conn(
                            conn_id,
                            ServerFrame::error(WsError::invalid_input(format!(
                                "unknown destination: {destination}"
                            ))),
                        )
                        .await;
                }
            },

            ClientFrame::Unsubscribe { destination } => {
                if let Some(Destination::GameTopic(game_id)) = Destination::parse(&destination) {
                    broadcaster.unsubscribe_game(conn_id, &game_id).await;
                }
            }

            ClientFrame::Send {
                destination,
                payload,
            } => {
                let Some(target) = AppDestination::parse(&destination) else {
                    let _ = broadcaster
                        .send_to_conn(
                            conn_id,
                            ServerFrame::error(WsError::invalid_input(format!(
                                "unknown destination: {destination}"
                            ))),
                        )
                        .await;
                    return;
                };

                let Some(user) = principal.clone() else {
                    let _ = broadcaster
                        .send_to_conn(
                            conn_id,
                            ServerFrame::error(WsError::unauthorized("no principal bound")),
                        )
                        .await;
                    return;
                };

                match target {
                    AppDestination::Move(game_id) => {
                        let mv: MovePayload = match serde_json::from_value(payload) {
                            Ok(mv) => mv,
                            Err(e) => {
                                let _ = broadcaster
                                    .send_to_conn(
                                        conn_id,
                                        ServerFrame::error(WsError::invalid_input(format!(
                                            "bad move payload: {e}"
                                        ))),
                                    )
                                    .await;
                                return;
                            }
                        };
                        if let Err(e) = play.human_move(game_id, &user, mv.row, mv.col).await {
                            let _ = broadcaster
                                .send_to_conn(conn_id, ServerFrame::error(WsError::from(&e)))
                                .await;
                        }
                    }
                    AppDestination::Forfeit(game_id) => {
                        if let Err(e) = play.forfeit(game_id, &user).await {
                            let _ = broadcaster
                                .send_to_conn(conn_id, ServerFrame::error(WsError::from(&e)))
                                .await;
                        }
                    }
                }
            }

            ClientFrame::Ping => {
                let _ = broadcaster.send_to_conn(conn_id, ServerFrame::Pong).await;
            }
        }
    }
}

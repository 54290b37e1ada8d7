//! WebSocket Game Server
//!
//! Async WebSocket server for the crash game. Accepts client
//! connections, routes bet/cash-out messages into the round engine,
//! and fans engine events out through the connection registry.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::engine::{RoundEngine, RoundEvent};
use crate::game::leaderboard::LeaderboardRow;
use crate::game::state::{PlayerId, RoundResult};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::registry::{ConnectionRegistry, SessionId};

/// Entries returned by the default leaderboard query.
const LEADERBOARD_TOP_N: usize = 20;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound message buffer per session.
    pub session_channel_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".parse().unwrap(),
            max_connections: 1000,
            session_channel_capacity: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind the listening socket. Fatal at startup.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Status snapshot for external collaborators (the HTTP layer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReport {
    /// Whether a round is currently Active.
    pub is_active: bool,
    /// Identifier of the current (or last) round.
    pub current_round: u64,
    /// Current client-visible multiplier.
    pub current_multiplier: f64,
    /// Unix timestamp (seconds) the current round started.
    pub round_start_time: f64,
    /// Recent crash values, oldest first.
    pub last_results: Vec<f64>,
    /// Distinct players with a live session.
    pub online_players: usize,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Round engine driving the game.
    engine: Arc<RoundEngine>,
    /// Live sessions and pending queues.
    registry: Arc<ConnectionRegistry>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server around an engine.
    pub fn new(config: ServerConfig, engine: Arc<RoundEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_tx,
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The round engine.
    pub fn engine(&self) -> Arc<RoundEngine> {
        Arc::clone(&self.engine)
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("game server listening on {}", self.config.bind_addr);

        // Fan engine events out to connected clients
        let forwarder = tokio::spawn(forward_round_events(
            self.engine.subscribe(),
            Arc::clone(&self.registry),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.registry.session_count().await >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        forwarder.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let channel_capacity = self.config.session_channel_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("websocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(channel_capacity);

            let session_id = registry.register(msg_tx.clone()).await;

            // Writer task: the only place this socket is written to
            let writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Greet with the session id and the current game state
            let _ = msg_tx
                .send(ServerMessage::ConnectionEstablished {
                    session_id: session_id.to_string(),
                })
                .await;
            let _ = msg_tx
                .send(ServerMessage::GameState(engine.snapshot().await))
                .await;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error {
                                            message: "malformed message".to_string(),
                                        }).await;
                                        continue;
                                    }
                                };

                                Self::dispatch(
                                    &engine,
                                    &registry,
                                    session_id,
                                    client_msg,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: unix_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("websocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            registry.unregister(session_id).await;
            writer.abort();
            info!("client {} cleaned up", addr);
        });
    }

    /// Route one decoded client message.
    async fn dispatch(
        engine: &Arc<RoundEngine>,
        registry: &Arc<ConnectionRegistry>,
        session_id: SessionId,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::PlaceBet(req) => {
                identify_session(registry, session_id, &req.player_id).await;

                let response = match engine
                    .place_bet(
                        req.player_id.clone(),
                        req.display_name(),
                        req.bet_amount,
                        req.auto_cash_out,
                    )
                    .await
                {
                    Ok(receipt) => {
                        registry
                            .broadcast_except(
                                session_id,
                                ServerMessage::NewBet {
                                    player_id: receipt.player_id.clone(),
                                    username: receipt.username.clone(),
                                    bet_amount: receipt.bet_amount,
                                },
                            )
                            .await;

                        ServerMessage::BetResponse {
                            success: true,
                            message: "bet placed".to_string(),
                            bet_data: Some((&receipt).into()),
                        }
                    }
                    Err(e) => ServerMessage::BetResponse {
                        success: false,
                        message: e.to_string(),
                        bet_data: None,
                    },
                };
                let _ = sender.send(response).await;
            }

            ClientMessage::CashOut(req) => {
                identify_session(registry, session_id, &req.player_id).await;

                let response = match engine.cash_out(&req.player_id).await {
                    Ok(receipt) => {
                        registry
                            .broadcast_except(
                                session_id,
                                ServerMessage::PlayerCashedOut {
                                    player_id: receipt.player_id.clone(),
                                    username: receipt.username.clone(),
                                    multiplier: receipt.multiplier,
                                    profit: receipt.profit,
                                },
                            )
                            .await;

                        ServerMessage::CashOutResponse {
                            success: true,
                            message: "cashed out".to_string(),
                            cash_out_data: Some((&receipt).into()),
                        }
                    }
                    Err(e) => ServerMessage::CashOutResponse {
                        success: false,
                        message: e.to_string(),
                        cash_out_data: None,
                    },
                };
                let _ = sender.send(response).await;
            }

            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: unix_millis(),
                    })
                    .await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Query surface for the (out-of-scope) HTTP layer
    // -------------------------------------------------------------------------

    /// Current status snapshot including the online player count.
    pub async fn status(&self) -> StatusReport {
        let snapshot = self.engine.snapshot().await;
        StatusReport {
            is_active: snapshot.is_active,
            current_round: snapshot.current_round,
            current_multiplier: snapshot.current_multiplier,
            round_start_time: snapshot.round_start_time,
            last_results: snapshot.last_results,
            online_players: self.registry.online_player_count().await,
        }
    }

    /// Top players by cumulative profit, descending.
    pub async fn leaderboard(&self) -> Vec<LeaderboardRow> {
        self.engine.leaderboard_top(LEADERBOARD_TOP_N).await
    }

    /// Round history; non-positive `limit` returns everything.
    pub async fn history(&self, limit: i64) -> Vec<RoundResult> {
        self.engine.round_history(limit).await
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.session_count().await
    }

    /// Signal the accept loop and all connections to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Mark the session as belonging to `player_id`, draining any backlog.
async fn identify_session(
    registry: &Arc<ConnectionRegistry>,
    session_id: SessionId,
    player_id: &PlayerId,
) {
    if !player_id.is_empty() {
        registry.identify(session_id, player_id).await;
    }
}

/// Forward engine events into the registry until shutdown.
async fn forward_round_events(
    mut events: broadcast::Receiver<RoundEvent>,
    registry: Arc<ConnectionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = shutdown_rx.recv() => break,
        };

        match event {
            Ok(RoundEvent::RoundStarted { round_id, start_time }) => {
                registry
                    .broadcast(ServerMessage::RoundStart { round_id, start_time })
                    .await;
            }
            Ok(RoundEvent::MultiplierChanged { multiplier, elapsed }) => {
                registry
                    .broadcast(ServerMessage::MultiplierUpdate { multiplier, elapsed })
                    .await;
            }
            Ok(RoundEvent::AutoCashedOut(receipt)) => {
                registry
                    .broadcast(ServerMessage::PlayerCashedOut {
                        player_id: receipt.player_id.clone(),
                        username: receipt.username.clone(),
                        multiplier: receipt.multiplier,
                        profit: receipt.profit,
                    })
                    .await;
                // The owner also gets a direct confirmation, queued if
                // they are offline.
                registry
                    .send_to(
                        &receipt.player_id,
                        ServerMessage::CashOutResponse {
                            success: true,
                            message: "auto cash-out executed".to_string(),
                            cash_out_data: Some((&receipt).into()),
                        },
                    )
                    .await;
            }
            Ok(RoundEvent::RoundEnded(result)) => {
                let round_end = ServerMessage::RoundEnd {
                    round_id: result.round_id,
                    crash_value: result.crash_value,
                    results: result.results.clone(),
                    timestamp: result.timestamp,
                };
                registry.broadcast(round_end.clone()).await;

                // Bettors without a live session get their result
                // queued for reconnection.
                for outcome in &result.results {
                    if !registry.has_live_session(&outcome.player_id).await {
                        registry
                            .send_to(&outcome.player_id, round_end.clone())
                            .await;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event forwarder lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Server unix time in milliseconds.
fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

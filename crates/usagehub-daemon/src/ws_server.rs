//! WebSocket server for real-time subscribers.
//!
//! Each accepted connection gets one lightweight task and one registered
//! send handle in the broadcast hub. Inbound messages are the duplex
//! protocol's `{type: ...}` JSON frames; outbound pushes arrive through the
//! hub and are forwarded to the socket. Connection failure on either
//! direction deregisters the subscriber.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use usagehub_core::types::{ClientMessage, ServerMessage};

use crate::hub::{BroadcastHub, SUBSCRIBER_BUFFER};
use crate::orchestrator::Orchestrator;

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `http://localhost:*` or `http://127.0.0.1:*` (local dashboard dev)
/// - `null` (file:// contexts)
/// - Absent origin header (non-browser clients like curl, native apps)
///
/// All other origins are rejected with HTTP 403.
fn validate_origin(
    req: &tokio_tungstenite::tungstenite::handshake::server::Request,
    resp: tokio_tungstenite::tungstenite::handshake::server::Response,
) -> Result<
    tokio_tungstenite::tungstenite::handshake::server::Response,
    tokio_tungstenite::tungstenite::handshake::server::ErrorResponse,
> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if origin_str == "null"
            || origin_str.starts_with("http://localhost")
            || origin_str.starts_with("http://127.0.0.1")
        {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
        let err_resp = http::Response::builder()
            .status(http::StatusCode::FORBIDDEN)
            .body(Some("Origin not allowed".into()))
            .expect("building error response");
        return Err(err_resp);
    }
    // No origin header = non-browser client (curl, native app), allow.
    Ok(resp)
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// Default maximum number of concurrent WebSocket connections.
const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// WebSocket server exposing the subscriber-facing duplex channel.
pub struct WsServer {
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
    max_connections: usize,
}

impl WsServer {
    pub fn new(
        addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            orchestrator,
            hub,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Set the maximum number of concurrent WebSocket connections.
    #[allow(dead_code)]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Run the server: bind TCP, accept connections, and spawn per-client
    /// handlers until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "ws server listening");
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let orchestrator = Arc::clone(&self.orchestrator);
                            let hub = Arc::clone(&self.hub);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_hdr_async(stream, validate_origin).await {
                                    Ok(ws_stream) => {
                                        if let Err(e) = handle_ws_client(ws_stream, orchestrator, hub, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_ws_client(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    orchestrator: Arc<Orchestrator>,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    // Hold only a weak handle here: the hub owns the one strong sender, so a
    // failed broadcast that deregisters this subscriber closes the channel
    // and `rx.recv()` below sees it.
    let weak_tx = tx.downgrade();
    let id = hub.register(tx);
    tracing::debug!(subscriber_id = ?id, "ws client connected");

    let result = client_loop(ws_stream, &orchestrator, weak_tx, rx, cancel).await;
    // The hub may have dropped us already after a failed send; removal is
    // idempotent either way.
    hub.deregister(id);
    result
}

async fn client_loop(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    orchestrator: &Arc<Orchestrator>,
    tx: mpsc::WeakSender<ServerMessage>,
    mut rx: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Best-effort initial message: recent events plus the latest snapshot.
    let initial = orchestrator.initial_message();
    ws_tx
        .send(Message::Text(serde_json::to_string(&initial)?))
        .await?;

    loop {
        tokio::select! {
            // --- incoming WebSocket message ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error, dropping client");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!("ws client disconnected (stream ended)");
                        return Ok(());
                    }
                };

                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => {
                        tracing::debug!("ws client sent close frame");
                        return Ok(());
                    }
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await?;
                        continue;
                    }
                    _ => continue,
                };

                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        let err = ServerMessage::Error {
                            data: format!("unrecognized message: {e}"),
                        };
                        ws_tx.send(Message::Text(serde_json::to_string(&err)?)).await?;
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Ping => {
                        let pong = ServerMessage::Pong { timestamp: Utc::now() };
                        ws_tx.send(Message::Text(serde_json::to_string(&pong)?)).await?;
                    }
                    ClientMessage::RequestUsageUpdate { session_id, config } => {
                        tracing::debug!(session_id = %session_id, "ws: on-demand refresh requested");
                        let Some(err_tx) = tx.upgrade() else {
                            // Already deregistered by the hub; the recv arm
                            // below will see the closed channel and finish.
                            continue;
                        };
                        let orch = Arc::clone(orchestrator);
                        // The refresh publishes through the hub on success;
                        // a rejection goes back to this subscriber only.
                        tokio::spawn(async move {
                            if let Err(e) = orch.refresh(&session_id, config).await {
                                let _ = err_tx.try_send(ServerMessage::Error {
                                    data: e.to_string(),
                                });
                            }
                        });
                    }
                }
            }

            // --- push from the hub (or a refresh error for this client) ---
            push = rx.recv() => {
                match push {
                    Some(message) => {
                        let text = serde_json::to_string(&message)?;
                        ws_tx.send(Message::Text(text)).await?;
                    }
                    None => {
                        // The hub dropped this subscriber after a failed send.
                        tracing::debug!("ws client channel closed by hub, dropping");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }

            // --- cancellation ---
            _ = cancel.cancelled() => {
                tracing::debug!("ws client handler: cancellation requested");
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

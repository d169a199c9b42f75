//! Relay server: shared state, WebSocket transport, and HTTP routes.
//!
//! Each accepted WebSocket gets a channel-backed [`PeerHandle`] registered
//! with the [`PairingEngine`]. A reader task feeds inbound frames to the
//! engine; a writer task drains the peer's bounded channel into the socket.
//! When either side stops, or the channel overflows because the client is not
//! reading, the socket is closed and the engine is told the connection is
//! gone.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::catalog::{self, Catalog};
use crate::config::RelayConfig;
use crate::engine::{self, PairingEngine};
use crate::peer::{Peer, PeerHandle};

/// Shared relay server state.
pub struct RelayState {
    /// Room pairing and message routing.
    pub engine: Arc<PairingEngine<PeerHandle>>,
    /// ROM listing and download.
    pub catalog: Catalog,
    /// Directory holding `index.html` and `jsnes/`.
    static_dir: std::path::PathBuf,
    /// Maximum size of one WebSocket message in bytes.
    max_message_size: usize,
    /// Frames queued per connection before it is dropped as stalled.
    outbound_queue_size: usize,
    /// How long a room may wait for its second player.
    room_idle_timeout: Option<Duration>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with default limits, serving from the current
    /// directory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RelayConfig::default())
    }

    /// Creates a relay state from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            engine: Arc::new(PairingEngine::new()),
            catalog: Catalog::new(&config.games_dir),
            static_dir: config.static_dir.clone(),
            max_message_size: config.max_message_size,
            outbound_queue_size: config.outbound_queue_size,
            room_idle_timeout: config.room_idle_timeout(),
        }
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Register a fresh peer handle with the engine.
/// 2. Spawn the writer task draining the peer's outbound channel.
/// 3. Feed every text or binary frame to the engine.
/// 4. On close, error or queue overflow, stop both tasks and report the
///    disconnect.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (peer, mut rx) = PeerHandle::channel(state.outbound_queue_size);
    let conn = peer.id();
    let overflow = peer.overflow();
    state.engine.connect(peer);
    tracing::info!(conn = %conn, "peer connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(into_ws_message(frame)).await.is_err() {
                tracing::warn!(conn = %conn, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_engine = Arc::clone(&state.engine);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    reader_engine.handle_message(conn, text.as_str().as_bytes().to_vec());
                }
                Message::Binary(data) => {
                    reader_engine.handle_message(conn, data.to_vec());
                }
                Message::Close(_) => {
                    tracing::info!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the WebSocket layer.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
        () = overflow.notified() => {
            tracing::warn!(conn = %conn, "client not reading, closing connection");
            read_task.abort();
            write_task.abort();
        }
    }

    state.engine.disconnect(conn);
    tracing::info!(conn = %conn, "peer disconnected");
}

/// UTF-8 frames go out as text, the way browser clients sent them; anything
/// else as binary.
fn into_ws_message(frame: Vec<u8>) -> Message {
    match String::from_utf8(frame) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

/// Builds the HTTP router: WebSocket endpoint, catalog, and static assets.
pub fn build_router(state: Arc<RelayState>) -> axum::Router {
    let index = ServeFile::new(state.static_dir.join("index.html"));
    let assets = ServeDir::new(state.static_dir.join("jsnes"));

    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/gamelist", axum::routing::get(catalog::list_handler))
        .route("/games", axum::routing::get(catalog::game_handler))
        .route_service("/", index)
        .nest_service("/jsnes", assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Also runs the idle-room sweeper for as long as the server runs, unless
/// room expiry is disabled.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let sweeper_engine = Arc::clone(&state.engine);
    let idle_timeout = state.room_idle_timeout;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let sweeper = idle_timeout.map(|max_idle| engine::spawn_room_sweeper(sweeper_engine, max_idle));
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

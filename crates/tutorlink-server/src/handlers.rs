//! Connection handlers.
//!
//! This module owns the connection lifecycle: the WebSocket upgrade, the
//! full-state push on connect, the per-connection event loop, cleanup on
//! disconnect, and the plain HTTP bootstrap endpoints.

use crate::config::Config;
use crate::intents;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{Days, Utc};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tutorlink_core::{ConnectionHandle, ConnectionRegistry, RoomMap, SnapshotStore};
use tutorlink_protocol::{codec, Dataset, ServerEvent};

/// Capacity of the global broadcast channel. A client that lags this far
/// behind misses events and self-heals via the next full-state push.
const BROADCAST_CAPACITY: usize = 1024;

/// Shared server state.
pub struct AppState {
    /// The snapshot store.
    pub store: SnapshotStore,
    /// Teacher bindings, pending deliveries, notification watchers.
    pub registry: ConnectionRegistry,
    /// Call-signaling rooms.
    pub rooms: RoomMap,
    /// Global broadcast fan-out to every connected client.
    pub events: broadcast::Sender<ServerEvent>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state around a loaded store.
    #[must_use]
    pub fn new(store: SnapshotStore, config: Config) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            store,
            registry: ConnectionRegistry::new(),
            rooms: RoomMap::new(),
            events,
            config,
        }
    }

    /// Broadcast an event to every connected client.
    ///
    /// Delivery is best-effort; with no connected clients the event is
    /// simply dropped.
    pub fn broadcast(&self, event: ServerEvent) {
        metrics::record_broadcast();
        let _ = self.events.send(event);
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be loaded or the listener
/// fails to bind.
pub async fn run_server(config: Config) -> Result<()> {
    let snapshot_path = shellexpand::tilde(&config.storage.snapshot_path).into_owned();
    let store = SnapshotStore::load(snapshot_path)?;

    // Retention sweep, once at process start.
    let cutoff = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(u64::from(config.storage.retention_days)))
        .unwrap_or_else(|| Utc::now().date_naive());
    let removed = store.sweep_expired(cutoff);
    if removed > 0 {
        info!(removed, "Dropped expired slots at startup");
    }

    let state = Arc::new(AppState::new(store, config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/slots", get(slots_handler))
        .route("/api/teachers", get(teachers_handler))
        .route("/api/sync", get(sync_handler))
        .with_state(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Tutorlink server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Polling fallback: the full slot list.
async fn slots_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.store.read(|data| data.slots.clone()))
}

/// Polling fallback: the full teacher directory.
async fn teachers_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.store.read(|data| data.teachers.clone()))
}

/// Polling fallback: the entire dataset as one document.
async fn sync_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(state.store.snapshot())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// The full-state push emitted to every newly connected client, in order.
fn snapshot_events(data: Dataset) -> Vec<ServerEvent> {
    let users = data.users();
    vec![
        ServerEvent::Slots { slots: data.slots },
        ServerEvent::Lessons {
            lessons: data.lessons,
        },
        ServerEvent::Conversations {
            conversations: data.conversations,
        },
        ServerEvent::Teachers {
            teachers: data.teachers,
        },
        ServerEvent::Students {
            students: data.students,
        },
        ServerEvent::Users { users },
    ]
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Targeted deliveries land in the connection's outbox; global
    // broadcasts arrive via the shared channel. Subscribing before the
    // snapshot push means a concurrent mutation is seen at most twice,
    // never missed.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(&connection_id, out_tx);
    let mut global_rx = state.events.subscribe();

    for event in snapshot_events(state.store.snapshot()) {
        if send_event(&mut sender, &event).await.is_err() {
            debug!(connection = %connection_id, "Connection lost during snapshot push");
            return;
        }
    }

    // The teacher id this connection declared, if any. Needed so cleanup
    // can release the binding without evicting a newer connection.
    let mut bound_teacher: Option<String> = None;

    loop {
        tokio::select! {
            biased;

            // Targeted deliveries (pending flush, demand routing,
            // notifications, signaling).
            Some(event) = out_rx.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Global broadcasts.
            result = global_rx.recv() => {
                match result {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Client self-heals via resync; just note the gap.
                        warn!(connection = %connection_id, skipped, "Broadcast receiver lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            // Inbound intents.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match codec::decode_client_event(&text) {
                            Ok(event) => {
                                intents::handle_client_event(
                                    event,
                                    &connection_id,
                                    &handle,
                                    &mut bound_teacher,
                                    &state,
                                );
                            }
                            Err(e) => {
                                // Malformed intents are dropped, never answered.
                                debug!(connection = %connection_id, error = %e, "Dropped malformed event");
                                metrics::record_error("malformed_event");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection = %connection_id, "Dropped unexpected binary message");
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: release the teacher binding (identity-checked), watcher
    // registrations, and signaling room memberships.
    if let Some(teacher_id) = bound_teacher {
        state.registry.unbind(&teacher_id, &connection_id);
        metrics::set_teachers_bound(state.registry.bound_count());
    }
    state.registry.drop_connection(&connection_id);
    state.rooms.drop_connection(&connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Send one event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let raw = codec::encode_server_event(event)?;
    sender.send(Message::Text(raw)).await?;
    Ok(())
}

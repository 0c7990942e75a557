//! HTTP and WebSocket handlers for the mbridge server.
//!
//! This module wires the bus, the push hub and the collaborators to axum
//! routes and handles the push connection lifecycle.

use crate::config::Config;
use crate::media::{MediaControl, MediaError};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::mixer::{MemoryMixer, Mixer, MixerError};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use mbridge_core::{Command, CommandDispatcher, HubConfig, IngestStats, Ingestor, PushHub};
use mbridge_protocol::TopicCodec;
use mbridge_transport::{BusMessage, BusPublisher, MemoryBus, MqttBus};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Push connection registry.
    pub hub: Arc<PushHub>,
    /// Outbound command path.
    pub dispatcher: CommandDispatcher,
    /// Local audio mixer.
    pub mixer: Arc<dyn Mixer>,
    /// Local media control.
    pub media: MediaControl,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state around an existing hub and bus.
    #[must_use]
    pub fn new(config: Config, hub: Arc<PushHub>, bus: Arc<dyn BusPublisher>) -> Self {
        let dispatcher = CommandDispatcher::new(config.mqtt.topics(), bus);
        let mixer = Arc::new(MemoryMixer::new(config.mixer.devices.clone()));
        let media = MediaControl::new(
            config.media.commands.clone(),
            config.media.now_playing.clone(),
        );

        Self {
            hub,
            dispatcher,
            mixer,
            media,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let hub = Arc::new(PushHub::with_config(HubConfig {
        send_buffer: config.push.send_buffer,
    }));
    let bus = start_bus(&config, Arc::clone(&hub));
    let state = Arc::new(AppState::new(config.clone(), hub, bus));
    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("mbridge listening on {}", addr);
    info!(
        "Push endpoint: ws://{}{}",
        addr, config.push.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.push.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/command", post(command_handler))
        .route("/devices", get(devices_handler))
        .route("/device/:id/volume", post(device_volume_handler))
        .route("/device/:id/mute", post(device_mute_handler))
        .route(
            "/session/:device_id/:session_id/volume",
            post(session_volume_handler),
        )
        .route(
            "/session/:device_id/:session_id/mute",
            post(session_mute_handler),
        )
        .route("/media/:action", post(media_action_handler))
        .route("/now-playing", get(now_playing_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Connect the bus and start ingesting. Falls back to an in-memory bus
/// when MQTT is disabled.
fn start_bus(config: &Config, hub: Arc<PushHub>) -> Arc<dyn BusPublisher> {
    if !config.mqtt.enabled {
        warn!("MQTT disabled: commands are kept in memory and no status is ingested");
        return Arc::new(MemoryBus::new());
    }

    let (bus, event_loop) = MqttBus::new(config.mqtt.client_config());
    let (tx, rx) = mpsc::channel(config.mqtt.channel_capacity.max(1));
    tokio::spawn(event_loop.run(tx));
    spawn_ingest(config.mqtt.topics(), hub, rx);

    Arc::new(bus)
}

/// Spawn the single ingest task feeding `hub`.
pub fn spawn_ingest(
    topics: TopicCodec,
    hub: Arc<PushHub>,
    inbound: mpsc::Receiver<BusMessage>,
) -> JoinHandle<IngestStats> {
    let ingestor = Ingestor::new(topics, hub);
    tokio::spawn(ingestor.run(inbound, |result| match result {
        Ok(ingested) => {
            metrics::record_ingested(ingested.producers, ingested.broadcast.pruned.len());
        }
        Err(e) => metrics::record_dropped(e.kind()),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "bus": state.dispatcher.bus_name(),
        "busConnected": state.dispatcher.is_healthy(),
        "producers": state.hub.snapshot().len(),
        "connections": state.hub.connection_count(),
        "mediaActions": state.media.actions(),
    }))
}

/// Current aggregate.
async fn state_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.snapshot().to_vec())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a push connection.
///
/// Frames queued by the hub are written out in order. The client is not
/// expected to send anything besides control frames.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (connection_id, mut frames) = state.hub.connect();

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!(connection = %connection_id, "Dropped by hub");
                    break;
                };
                metrics::record_frame(frame.len());
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        trace!(connection = %connection_id, "Ignoring client frame");
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
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

    state.hub.disconnect(&connection_id);
    let _ = sender.close().await;

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Body of `POST /command`.
#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(rename = "serverId", alias = "identity")]
    server_id: String,
    action: String,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

/// Forward a command to one producer.
async fn command_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<CommandRequest>, JsonRejection>,
) -> Response {
    let request = match request {
        Ok(Json(request)) => request,
        Err(rejection) => {
            metrics::record_command(false);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": rejection.body_text() })),
            )
                .into_response();
        }
    };
    let mut command = Command::new(request.server_id, request.action);
    if let Some(payload) = request.payload {
        command = command.with_payload(payload);
    }

    match state.dispatcher.dispatch(&command).await {
        Ok(topic) => {
            metrics::record_command(true);
            Json(json!({ "success": true, "topic": topic })).into_response()
        }
        Err(e) => {
            metrics::record_command(false);
            let status = if e.is_invalid_request() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for MixerError {
    fn into_response(self) -> Response {
        error_json(StatusCode::NOT_FOUND, self.to_string())
    }
}

/// Failure of a mixer route: an unreadable body or a missing target.
enum MixerRouteError {
    Body(JsonRejection),
    Mixer(MixerError),
}

impl From<JsonRejection> for MixerRouteError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection)
    }
}

impl From<MixerError> for MixerRouteError {
    fn from(e: MixerError) -> Self {
        Self::Mixer(e)
    }
}

impl IntoResponse for MixerRouteError {
    fn into_response(self) -> Response {
        match self {
            Self::Body(rejection) => error_json(StatusCode::BAD_REQUEST, rejection.body_text()),
            Self::Mixer(e) => e.into_response(),
        }
    }
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        let status = match self {
            MediaError::UnknownAction(_) | MediaError::NotConfigured => StatusCode::NOT_FOUND,
            MediaError::Spawn { .. } | MediaError::Failed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_json(status, self.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct VolumeBody {
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct MuteBody {
    #[serde(default)]
    mute: bool,
}

fn parse_index(raw: &str, missing: MixerError) -> Result<usize, MixerError> {
    raw.parse().map_err(|_| missing)
}

async fn devices_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.mixer.devices())
}

async fn device_volume_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<VolumeBody>, JsonRejection>,
) -> Result<Json<Value>, MixerRouteError> {
    let Json(body) = body?;
    let device = parse_index(&id, MixerError::DeviceNotFound)?;
    let volume = state.mixer.set_device_volume(device, body.volume)?;
    Ok(Json(json!({ "success": true, "newVolume": volume })))
}

async fn device_mute_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<MuteBody>, JsonRejection>,
) -> Result<Json<Value>, MixerRouteError> {
    let Json(body) = body?;
    let device = parse_index(&id, MixerError::DeviceNotFound)?;
    let mute = state.mixer.set_device_mute(device, body.mute)?;
    Ok(Json(json!({ "success": true, "mute": mute })))
}

async fn session_volume_handler(
    State(state): State<Arc<AppState>>,
    Path((device_id, session_id)): Path<(String, String)>,
    body: Result<Json<VolumeBody>, JsonRejection>,
) -> Result<Json<Value>, MixerRouteError> {
    let Json(body) = body?;
    let device = parse_index(&device_id, MixerError::DeviceNotFound)?;
    let session = parse_index(&session_id, MixerError::SessionNotFound)?;
    let volume = state
        .mixer
        .set_session_volume(device, session, body.volume)?;
    Ok(Json(json!({ "success": true, "newVolume": volume })))
}

async fn session_mute_handler(
    State(state): State<Arc<AppState>>,
    Path((device_id, session_id)): Path<(String, String)>,
    body: Result<Json<MuteBody>, JsonRejection>,
) -> Result<Json<Value>, MixerRouteError> {
    let Json(body) = body?;
    let device = parse_index(&device_id, MixerError::DeviceNotFound)?;
    let session = parse_index(&session_id, MixerError::SessionNotFound)?;
    let mute = state.mixer.set_session_mute(device, session, body.mute)?;
    Ok(Json(json!({ "success": true, "mute": mute })))
}

async fn media_action_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<Value>, MediaError> {
    state.media.run_action(&action).await.map(Json)
}

async fn now_playing_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, MediaError> {
    state.media.now_playing().await.map(Json)
}

use super::state::AppState;
use crate::session::{ConfigError, ProjectSetup, SessionSnapshot, SettingsUpdate};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub success: bool,
    /// Register directory takes will be written to
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub success: bool,
    pub state: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RemoteUrlResponse {
    pub success: bool,
    /// Address a phone on the same network opens
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SetNoteRequest {
    pub midi: i32,
}

#[derive(Debug, Deserialize)]
pub struct NewRegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tremulant: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(e: ConfigError) -> Response {
    warn!("Rejected request: {}", e);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/state
pub async fn get_state(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.recorder.snapshot().await)
}

/// GET /api/devices
pub async fn list_devices(State(state): State<AppState>) -> Response {
    match state.recorder.list_devices().await {
        Ok(devices) => (StatusCode::OK, Json(devices)).into_response(),
        Err(e) => {
            error!("Failed to list input devices: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Failed to list input devices: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// POST /api/setup
/// Select project and register
pub async fn setup_project(
    State(state): State<AppState>,
    Json(req): Json<ProjectSetup>,
) -> Response {
    info!("Setting up project {:?}, register {:?}", req.project, req.register);

    match state.recorder.configure_project(req).await {
        Ok(path) => Json(PathResponse {
            success: true,
            path,
        })
        .into_response(),
        Err(e) => bad_request(e),
    }
}

/// POST /api/settings
/// Apply any subset of settings
pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<SettingsUpdate>,
) -> Response {
    match state.recorder.update_settings(req).await {
        Ok(snapshot) => Json(SettingsResponse {
            success: true,
            state: snapshot,
        })
        .into_response(),
        Err(e) => bad_request(e),
    }
}

/// POST /api/new-register
pub async fn new_register(
    State(state): State<AppState>,
    Json(req): Json<NewRegisterRequest>,
) -> Response {
    match state.recorder.new_register(&req.name, req.tremulant).await {
        Ok(path) => Json(PathResponse {
            success: true,
            path,
        })
        .into_response(),
        Err(e) => bad_request(e),
    }
}

/// POST /api/record
/// Record from the current note to the end of the range
pub async fn record(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.start().await;
    SuccessResponse::ok()
}

/// POST /api/record-single
pub async fn record_single(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.start_single().await;
    SuccessResponse::ok()
}

/// POST /api/stop
pub async fn stop(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.stop().await;
    SuccessResponse::ok()
}

/// POST /api/pause
pub async fn pause(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.pause().await;
    SuccessResponse::ok()
}

/// POST /api/redo
pub async fn redo(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.redo().await;
    SuccessResponse::ok()
}

/// POST /api/next
pub async fn next_note(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.next_note().await;
    SuccessResponse::ok()
}

/// POST /api/prev
pub async fn prev_note(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.recorder.prev_note().await;
    SuccessResponse::ok()
}

/// POST /api/set-note
pub async fn set_note(
    State(state): State<AppState>,
    Json(req): Json<SetNoteRequest>,
) -> Json<SuccessResponse> {
    state.recorder.jump_to(req.midi).await;
    SuccessResponse::ok()
}

/// GET /api/remote-url
pub async fn remote_url(State(state): State<AppState>) -> Json<RemoteUrlResponse> {
    let ip = local_ip().await;
    Json(RemoteUrlResponse {
        success: true,
        url: format!("http://{}:{}", ip, state.port),
    })
}

/// POST /api/shutdown
/// Stops any cycle and lets the server wind down
pub async fn shutdown(State(state): State<AppState>) -> Json<SuccessResponse> {
    info!("Shutdown requested over HTTP");
    state.recorder.stop().await;
    state.shutdown.cancel();
    SuccessResponse::ok()
}

/// Address of the interface used for outbound traffic
///
/// Connecting a UDP socket sends nothing; it only picks a route. Falls back
/// to loopback on hosts without a network.
async fn local_ip() -> IpAddr {
    let route_lookup = async {
        let socket = tokio::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await?;
        Ok::<_, std::io::Error>(socket.local_addr()?)
    };
    match route_lookup.await {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            warn!("No route to the local network, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

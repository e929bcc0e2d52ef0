// Integration tests for the remote control HTTP API

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{test_config, Harness, SyntheticHost};
use organ_sampler::{create_router, AppState, Phase};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn app(harness: &Harness) -> Router {
    create_router(AppState::new(harness.recorder.clone()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;

    let (status, body) = call(&app(&harness), "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
    Ok(())
}

#[tokio::test]
async fn test_state_shape() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;

    let (status, state) = call(&app(&harness), "GET", "/api/state", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["phase"], "idle");
    assert_eq!(state["is_running"], false);
    assert_eq!(state["note"]["current_midi"], 60);
    assert_eq!(state["note"]["current_name"], "C4");
    assert_eq!(state["note"]["current_filename"], "060-c.wav");
    assert_eq!(state["note"]["total"], 3);
    assert_eq!(state["settings"]["bit_depth"], 16);
    assert_eq!(state["settings"]["end_note"], 62);
    Ok(())
}

#[tokio::test]
async fn test_setup_and_register_switch() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;
    let app = app(&harness);

    let (status, body) = call(
        &app,
        "POST",
        "/api/setup",
        Some(json!({ "project": "Bätz", "register": "Prestant 8", "keyboard": "Hoofdwerk" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let expected = root.path().join("Bätz").join("Hoofdwerk").join("Prestant 8");
    assert_eq!(body["path"], &*expected.to_string_lossy());
    assert!(expected.is_dir());

    let (status, body) = call(
        &app,
        "POST",
        "/api/new-register",
        Some(json!({ "name": "Vox humana 8", "tremulant": true })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["path"].as_str().unwrap_or_default().ends_with("Vox humana 8_trem"));

    let (_, state) = call(&app, "GET", "/api/state", None).await?;
    assert_eq!(state["register"], "Vox humana 8");
    assert_eq!(state["tremulant"], true);
    Ok(())
}

#[tokio::test]
async fn test_setup_missing_register_is_bad_request() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;

    let (status, body) = call(&app(&harness), "POST", "/api/setup", Some(json!({ "project": "Bätz" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("register"));
    Ok(())
}

#[tokio::test]
async fn test_settings_and_navigation() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;
    let app = app(&harness);

    let (status, body) = call(
        &app,
        "POST",
        "/api/settings",
        Some(json!({ "start_note": 36, "end_note": 96, "bit_depth": 24 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["settings"]["bit_depth"], 24);

    call(&app, "POST", "/api/set-note", Some(json!({ "midi": 50 }))).await?;
    call(&app, "POST", "/api/next", None).await?;
    call(&app, "POST", "/api/next", None).await?;
    call(&app, "POST", "/api/prev", None).await?;
    assert_eq!(harness.recorder.snapshot().await.current_note(), 51);

    let (status, body) = call(&app, "POST", "/api/settings", Some(json!({ "end_note": 40 }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["note"]["current_midi"], 40);

    let (status, _) = call(&app, "POST", "/api/settings", Some(json!({ "start_note": 50 }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_record_and_stop() -> Result<()> {
    let root = TempDir::new()?;
    let mut config = test_config(root.path());
    config.countdown_seconds = 10;
    let harness = Harness::new(SyntheticHost::new(), config)?;
    let app = app(&harness);

    call(&app, "POST", "/api/setup", Some(json!({ "project": "Bätz", "register": "Prestant 8" }))).await?;

    let (status, body) = call(&app, "POST", "/api/record", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(harness.recorder.snapshot().await.is_running);

    call(&app, "POST", "/api/pause", None).await?;
    assert_eq!(harness.recorder.snapshot().await.phase, Phase::Paused);

    call(&app, "POST", "/api/stop", None).await?;
    let snapshot = harness.recorder.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(!snapshot.is_running);
    Ok(())
}

#[tokio::test]
async fn test_list_devices() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;

    let (status, devices) = call(&app(&harness), "GET", "/api/devices", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices.as_array().map(Vec::len), Some(3));
    assert_eq!(devices[0]["id"], "synth-a");
    assert_eq!(devices[0]["is_default"], true);
    Ok(())
}

#[tokio::test]
async fn test_remote_url_uses_serving_port() -> Result<()> {
    let root = TempDir::new()?;
    let harness = Harness::new(SyntheticHost::new(), test_config(root.path()))?;
    let app = create_router(AppState::new(harness.recorder.clone()).with_port(6060));

    let (status, body) = call(&app, "GET", "/api/remote-url", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let url = body["url"].as_str().unwrap_or_default();
    let authority = url.strip_prefix("http://").expect("http url");
    let (host, port) = authority.rsplit_once(':').expect("host and port");
    assert_eq!(port, "6060");
    assert!(host.parse::<std::net::IpAddr>().is_ok(), "{} is not an address", host);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_cycle_and_signals_server() -> Result<()> {
    let root = TempDir::new()?;
    let mut config = test_config(root.path());
    config.countdown_seconds = 10;
    let harness = Harness::new(SyntheticHost::new(), config)?;
    let stop_requested = CancellationToken::new();
    let app = create_router(
        AppState::new(harness.recorder.clone()).with_shutdown(stop_requested.clone()),
    );

    call(&app, "POST", "/api/setup", Some(json!({ "project": "Bätz", "register": "Prestant 8" }))).await?;
    call(&app, "POST", "/api/record", None).await?;
    assert!(harness.recorder.snapshot().await.is_running);
    assert!(!stop_requested.is_cancelled());

    let (status, body) = call(&app, "POST", "/api/shutdown", Some(json!({}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(stop_requested.is_cancelled());

    let snapshot = harness.recorder.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(!snapshot.is_running);
    Ok(())
}

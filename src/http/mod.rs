//! HTTP API server for remote control (phones and tablets on the LAN)
//!
//! This module provides a JSON API over the recorder:
//! - GET /api/state - Current session snapshot
//! - GET /api/devices - Available input devices
//! - POST /api/setup, /api/settings, /api/new-register - Configuration
//! - POST /api/record, /api/record-single, /api/stop, /api/pause, /api/redo - Cycle control
//! - POST /api/next, /api/prev, /api/set-note - Note pointer
//! - GET /api/remote-url - LAN address for phones
//! - POST /api/shutdown - Stop recording and exit the server
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

//! JSON API handlers for the library, stream statistics and health

use axum::extract::State;
use axum::response::Json;
use kino_core::library::LibraryEntry;
use serde_json::{Value, json};

use crate::server::AppState;

/// Lists every video in the library.
pub async fn api_library(State(state): State<AppState>) -> Json<Value> {
    let entries: Vec<LibraryEntry> = state.library.entries().await;
    Json(json!({
        "total": entries.len(),
        "videos": entries,
    }))
}

/// Reports transcode counters and held file locks.
pub async fn api_streams(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "stats": state.streams.stats(),
        "active_readers": state.streams.locks().active_readers(),
        "locks": state.streams.lock_snapshot(),
    }))
}

/// Liveness check.
pub async fn api_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

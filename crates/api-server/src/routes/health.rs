//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::config::IdentityMode;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    data_dir: String,
    identity_mode: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.config();
    let identity_mode = match config.identity_mode {
        IdentityMode::Local => "local",
        IdentityMode::Remote => "remote",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir: config.data_dir.to_string_lossy().to_string(),
        identity_mode: identity_mode.to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

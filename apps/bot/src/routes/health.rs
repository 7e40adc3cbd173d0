use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

/// GET /health
/// Returns service status, version, and the number of live sessions.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let sessions = state.store.len().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "sessions": sessions
    })))
}

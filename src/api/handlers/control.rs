use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// POST /api/control/stop: Pause signal intake and the position monitor.
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.set_paused(true);
    tracing::warn!("Copy engine PAUSED via control API");
    (StatusCode::OK, Json(json!({ "status": "paused" })))
}

/// POST /api/control/resume: Resume the copy engine.
pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    state.engine.set_paused(false);
    tracing::info!("Copy engine RESUMED via control API");
    (StatusCode::OK, Json(json!({ "status": "running" })))
}

/// GET /api/control/status: Current system status.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let risk = state.engine.risk().snapshot().await;
    let performance = state.engine.ledger().performance_summary().await;

    Json(json!({
        "paused": state.engine.is_paused(),
        "bankroll": state.engine.bankroll(),
        "breaker_tripped": risk.breaker_tripped,
        "breaker_reason": risk.breaker_reason,
        "open_positions": performance.open_positions,
        "daily_pnl": risk.daily_pnl,
        "db_mirroring": state.db.is_some(),
    }))
}

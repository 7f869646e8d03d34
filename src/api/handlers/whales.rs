use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::errors::AppError;
use crate::models::{Position, WhaleStats};
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<WhaleStats>> {
    let mut whales = state.engine.whales().all().await;
    whales.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));
    Json(whales)
}

pub async fn detail(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state
        .engine
        .whales()
        .get(&address)
        .await
        .ok_or_else(|| AppError::NotFound(format!("whale {address}")))?;
    let quarantined = state.engine.risk().is_quarantined(&address).await;

    Ok(Json(json!({ "stats": stats, "quarantined": quarantined })))
}

pub async fn positions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<Vec<Position>> {
    Json(state.engine.ledger().positions_for_whale(&address).await)
}

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::ledger::TriggeredExit;
use crate::models::{CloseReason, Position};
use crate::AppState;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

/// GET /api/positions: open positions by default, `?status=all` for
/// everything still in the ledger.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Position>> {
    let positions = match params.status.as_deref() {
        Some("all") => state.engine.ledger().all_positions().await,
        _ => state.engine.ledger().open_positions().await,
    };
    Json(positions)
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Position>, AppError> {
    let position = state
        .engine
        .ledger()
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("position {id}")))?;
    Ok(Json(position))
}

/// GET /api/positions/requiring-action: open positions whose stop or
/// target is already breached at the current mark.
pub async fn requiring_action(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.engine.ledger().positions_requiring_action().await)
}

/// POST /api/positions/:id/close: manual close at the current mark.
pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let position = state
        .engine
        .ledger()
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("position {id}")))?;
    if !position.is_open() {
        return Err(AppError::BadRequest(format!("position {id} is not open")));
    }

    tracing::warn!(position_id = %id, "Manual close requested via API");
    state
        .engine
        .execute_exit(TriggeredExit {
            position_id: id,
            token_id: position.token_id.clone(),
            size: position.current_size,
            price: position.current_price,
            reason: CloseReason::Manual,
        })
        .await;

    Ok(Json(json!({ "status": "close_submitted", "position_id": id })))
}

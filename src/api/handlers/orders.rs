use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Order, OrderTransition};
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<Order>> {
    let mut orders = state.engine.executor().all_orders().await;
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(orders)
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .engine
        .executor()
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    Ok(Json(order))
}

/// GET /api/orders/:id/transitions: full audit history for one order.
pub async fn transitions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Vec<OrderTransition>> {
    Json(state.audit.transitions_for(id).await)
}

/// GET /api/orders/dead-letter: orders that exhausted their retries and
/// need manual review.
pub async fn dead_letters(State(state): State<AppState>) -> Json<Vec<Order>> {
    Json(state.engine.executor().dead_letters().await)
}

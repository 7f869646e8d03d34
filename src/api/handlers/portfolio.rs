use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// GET /api/portfolio/summary: exposure view plus aggregate performance.
pub async fn summary(State(state): State<AppState>) -> Json<serde_json::Value> {
    let bankroll = state.engine.bankroll();
    let view = state.engine.ledger().portfolio_view(bankroll).await;
    let performance = state.engine.ledger().performance_summary().await;

    Json(json!({
        "bankroll": bankroll,
        "portfolio": view,
        "performance": performance,
    }))
}

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::execution::risk_manager::{check_request, RiskRequest, RiskState};
use crate::AppState;

pub async fn status(State(state): State<AppState>) -> Json<RiskState> {
    Json(state.engine.risk().snapshot().await)
}

#[derive(Deserialize)]
pub struct CheckParams {
    pub whale_address: String,
    pub market_id: String,
    pub notional: Decimal,
}

/// POST /api/risk/check: dry-run the pre-trade gate against the current
/// snapshot. Reads only; the real gate runs again at submission.
pub async fn check(
    State(state): State<AppState>,
    Json(params): Json<CheckParams>,
) -> Json<serde_json::Value> {
    let snapshot = state.engine.risk().snapshot().await;
    let nav = state
        .engine
        .ledger()
        .portfolio_view(state.engine.bankroll())
        .await
        .nav;
    let request = RiskRequest {
        whale_address: params.whale_address,
        market_id: params.market_id,
        notional: params.notional,
    };

    match check_request(
        &request,
        &snapshot,
        state.engine.risk().limits(),
        nav,
        Utc::now(),
    ) {
        Ok(approval) => Json(json!({
            "approved": true,
            "notional": approval.notional,
            "scaled_down": approval.scaled_down,
        })),
        Err(violation) => Json(json!({
            "approved": false,
            "violation": violation.to_string(),
        })),
    }
}

/// POST /api/risk/reset-breaker: manual reset after operator review. The
/// breaker never resets itself within a trading day.
pub async fn reset_breaker(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.risk().reset_breaker().await;
    tracing::warn!("Circuit breaker reset via API");
    Json(json!({ "status": "breaker_reset" }))
}

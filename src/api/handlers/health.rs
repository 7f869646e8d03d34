use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db = match &state.db {
        Some(pool) => {
            if sqlx::query("SELECT 1").execute(pool).await.is_ok() {
                "connected"
            } else {
                "disconnected"
            }
        }
        None => "disabled",
    };

    if db == "disconnected" {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "db": db })),
        )
    } else {
        (StatusCode::OK, Json(json!({ "status": "healthy", "db": db })))
    }
}

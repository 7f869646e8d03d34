use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::AppState;

/// Bearer-token authentication middleware.
///
/// When `api_token` is configured, every request must carry
/// `Authorization: Bearer <token>` matching that value. With no token
/// configured, authentication is disabled (dev mode).
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_token.as_deref() else {
        return next.run(req).await;
    };

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) if token == expected => next.run(req).await,
        Some(_) => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
        None => {
            (StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header").into_response()
        }
    }
}

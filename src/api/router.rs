use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::require_auth;
use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Public routes, no authentication required
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render));

    // Protected API routes, Bearer token required when one is configured
    let protected = Router::new()
        // Positions
        .route("/api/positions", get(handlers::positions::list))
        .route(
            "/api/positions/requiring-action",
            get(handlers::positions::requiring_action),
        )
        .route("/api/positions/:id", get(handlers::positions::detail))
        .route("/api/positions/:id/close", post(handlers::positions::close))
        // Orders
        .route("/api/orders", get(handlers::orders::list))
        .route("/api/orders/dead-letter", get(handlers::orders::dead_letters))
        .route("/api/orders/:id", get(handlers::orders::detail))
        .route("/api/orders/:id/transitions", get(handlers::orders::transitions))
        // Whales
        .route("/api/whales", get(handlers::whales::list))
        .route("/api/whales/:address", get(handlers::whales::detail))
        .route("/api/whales/:address/positions", get(handlers::whales::positions))
        // Portfolio
        .route("/api/portfolio/summary", get(handlers::portfolio::summary))
        // Risk
        .route("/api/risk/status", get(handlers::risk::status))
        .route("/api/risk/check", post(handlers::risk::check))
        .route("/api/risk/reset-breaker", post(handlers::risk::reset_breaker))
        // Control
        .route("/api/control/stop", post(handlers::control::stop))
        .route("/api/control/resume", post(handlers::control::resume))
        .route("/api/control/status", get(handlers::control::status))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // CORS: the dashboard proxies from the same origin; direct access
    // still needs the token.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

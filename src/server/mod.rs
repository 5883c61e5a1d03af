pub mod routes;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/calculate", post(routes::calculate))
        .route("/api/profile", post(routes::ensure_profile))
        .route("/api/tokens", get(routes::get_tokens))
        .route("/api/calculations", get(routes::list_calculations))
        .route(
            "/api/calculations/{id}",
            get(routes::get_calculation)
                .patch(routes::update_calculation)
                .delete(routes::delete_calculation),
        )
        .route("/api/counters", get(routes::get_counters))
        .route("/health", get(routes::health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

//! Router configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_subscription, get_feed, list_subscription_lists, progress_stream, AppState,
};

/// Create the API router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/feed", get(get_feed))
        .route("/feed/progress", get(progress_stream))
        .route("/subscriptions", post(add_subscription))
        .route("/subscription-lists", get(list_subscription_lists));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health_check() -> &'static str {
    "OK"
}

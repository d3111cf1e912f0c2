use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Natural-language querying
            .route("/query", post(handlers::query_data))
            .route("/logs/query", post(handlers::query_logs))
            // System status
            .route("/status", get(handlers::system_status)),
    )
}

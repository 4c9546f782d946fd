mod cache;
mod health;
mod media;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use super::middleware::{log_responses, set_request_context};
use crate::application::registry::ServiceRegistry;

pub fn build_admin_router(registry: ServiceRegistry) -> Router {
    Router::new()
        .route("/_health", get(health::admin_health))
        .route("/cache/clear", post(cache::clear_cache))
        .route("/cache/warm", post(cache::warm_cache))
        .route("/cache/stats", get(cache::cache_stats))
        .route("/cdn/purge", post(cache::purge_cdn))
        .route("/media/transform", post(media::transform_images))
        .route("/media/remove-transforms", post(media::remove_transforms))
        .with_state(registry)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

fn message(message: &'static str) -> axum::Json<MessageResponse> {
    axum::Json(MessageResponse { message })
}

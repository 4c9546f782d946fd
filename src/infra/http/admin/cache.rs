use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::message;
use crate::application::{
    error::HttpError,
    jobs::WarmStart,
    registry::{PurgeRequest, ServiceRegistry},
};

pub(super) async fn clear_cache(State(registry): State<ServiceRegistry>) -> Response {
    let report = registry.clear_all().await;
    info!(
        target = "quire::http::admin::cache",
        wiped = report.wiped,
        "cache cleared from admin"
    );
    message("Cache cleared").into_response()
}

pub(super) async fn warm_cache(
    State(registry): State<ServiceRegistry>,
) -> Result<Response, HttpError> {
    let started = registry.warm(Some("admin".to_string())).await?;
    let body = match started {
        WarmStart::Started(_) => message("Warming started"),
        WarmStart::AlreadyRunning => message("Warming already running"),
    };
    Ok((StatusCode::ACCEPTED, body).into_response())
}

pub(super) async fn cache_stats(State(registry): State<ServiceRegistry>) -> Response {
    Json(registry.cache_stats().await).into_response()
}

pub(super) async fn purge_cdn(
    State(registry): State<ServiceRegistry>,
    Json(request): Json<PurgeRequest>,
) -> Result<Response, HttpError> {
    let outcome = registry.purge_cdn(&request).await?;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)).into_response())
}

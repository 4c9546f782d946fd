//! Static page capture middleware.
//!
//! Feeds every response of the wrapped router through
//! [`InvalidationCoordinator::on_response_ready`]. Only bodies that can be
//! saved are buffered; the client then gets an identical response rebuilt from
//! the buffered bytes. Everything else passes through untouched.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument, warn};

use super::coordinator::{CapturedRequest, CapturedResponse, InvalidationCoordinator, ResponseFormat};

const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// Shared state for [`static_cache_layer`].
#[derive(Clone)]
pub struct CacheState {
    pub coordinator: Arc<InvalidationCoordinator>,
}

/// Request traits the host marks through request extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureFlags {
    pub console: bool,
    pub action: bool,
    pub preview: bool,
}

/// Middleware that stores cacheable HTML responses as static files.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn static_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = cache.coordinator.config();
    if !config.enabled {
        return next.run(request).await;
    }

    let host = request_host(request.headers(), &request);
    let path = request.uri().path().to_string();
    let Some(site) = host
        .as_deref()
        .and_then(|host| config.site_for_request(host, &path))
    else {
        debug!(cache = "static", outcome = "skip", "no site for request host");
        return next.run(request).await;
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
    let scheme = site.base_url.split_once("://").map_or("http", |(scheme, _)| scheme);
    let flags = request
        .extensions()
        .get::<CaptureFlags>()
        .copied()
        .unwrap_or_default();

    let captured = CapturedRequest {
        site_id: site.id,
        url: format!("{scheme}://{}{path_and_query}", host.unwrap_or_default()),
        method: request.method().as_str().to_string(),
        site_request: true,
        console: flags.console,
        action: flags.action,
        preview: flags.preview,
    };

    let response = next.run(request).await;
    let format = detect_format(response.headers());

    let buffer = cache.coordinator.request_filter(&captured).is_ok()
        && format != ResponseFormat::Other
        && response.status() == StatusCode::OK;
    if !buffer {
        let skipped = CapturedResponse {
            status: response.status().as_u16(),
            format,
            body: &[],
        };
        cache.coordinator.on_response_ready(&captured, &skipped).await;
        return response;
    }

    if !fits_capture_limit(&response) {
        debug!(
            cache = "static",
            outcome = "skip",
            limit = MAX_CAPTURE_BYTES,
            "response body too large or of unknown size"
        );
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(cache = "static", error = %err, "response body failed while buffering");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let capture = CapturedResponse {
        status: parts.status.as_u16(),
        format,
        body: &bytes,
    };
    cache.coordinator.on_response_ready(&captured, &capture).await;

    Response::from_parts(parts, Body::from(bytes))
}

/// Whether the body is known to fit in [`MAX_CAPTURE_BYTES`], from its size
/// hint or its `Content-Length`.
fn fits_capture_limit(response: &Response) -> bool {
    let limit = MAX_CAPTURE_BYTES as u64;
    if let Some(upper) = response.body().size_hint().upper() {
        return upper <= limit;
    }
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .is_some_and(|length| length <= limit)
}

fn request_host(headers: &HeaderMap, request: &Request<Body>) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()))
}

/// Response format from its content type.
fn detect_format(headers: &HeaderMap) -> ResponseFormat {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("text/html") {
        ResponseFormat::Html
    } else {
        ResponseFormat::Other
    }
}

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware,
    response::Html,
    routing::get,
};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use quire::{
    cache::{CacheState, INVALIDATE_ALL_LOCK, MutationOutcome, element_lock_key, static_cache_layer},
    domain::types::MutationEvent,
    infra::memory::MemoryContentGraph,
};
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use support::{SITE_URL, base_config, cached_file, entry, runtime, settings};

fn page_router(state: CacheState, hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/blog/hello",
            get(move || {
                let hits = hits.clone();
                async move {
                    let version = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    Html(format!("<p>v{version}</p>"))
                }
            }),
        )
        .route("/plain", get(|| async { "not html" }))
        .layer(middleware::from_fn_with_state(state, static_cache_layer))
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "example.com")
        .body(Body::empty())
        .expect("request")
}

fn cached_body(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).expect("cached page")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn middleware_stores_html_and_overwrites_on_rerender() {
    let root = TempDir::new().expect("tempdir");
    let settings = settings(root.path(), &base_config(root.path()));
    let runtime = runtime(&settings, Arc::new(MemoryContentGraph::default()));
    let state = CacheState {
        coordinator: runtime.registry.cache.clone(),
    };
    let app = page_router(state, Arc::new(AtomicUsize::new(0)));
    let file = cached_file(root.path(), "blog/hello");

    let first = app.clone().oneshot(get_request("/blog/hello")).await.expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_text(first).await, "<p>v1</p>");
    assert!(cached_body(&file).starts_with("<p>v1</p><!-- Cached on "));

    let second = app.clone().oneshot(get_request("/blog/hello")).await.expect("response");
    assert_eq!(body_text(second).await, "<p>v2</p>");
    assert!(cached_body(&file).starts_with("<p>v2</p><!-- Cached on "));

    let with_query = app
        .clone()
        .oneshot(get_request("/blog/hello?page=2"))
        .await
        .expect("response");
    assert_eq!(body_text(with_query).await, "<p>v3</p>");
    assert!(cached_body(&file).starts_with("<p>v2</p><!-- Cached on "));

    let plain = app.oneshot(get_request("/plain")).await.expect("response");
    assert_eq!(body_text(plain).await, "not html");
    assert!(!cached_file(root.path(), "plain").exists());
}

#[tokio::test]
async fn relation_invalidation_removes_related_pages_only() {
    let root = TempDir::new().expect("tempdir");
    let config = format!(
        "{}\n[cache.relations]\nblog = [\"news\", \"/listing\"]\n",
        base_config(root.path())
    );
    let settings = settings(root.path(), &config);

    let graph = Arc::new(MemoryContentGraph::default());
    let post = entry(1, "blog", "blog/hello");
    graph.insert_element(post.clone());
    graph.insert_element(entry(2, "news", "news/today"));
    graph.insert_element(entry(3, "pages", "about"));
    let runtime = runtime(&settings, graph);

    let store = runtime.registry.cache.store();
    for uri in ["blog/hello", "news/today", "listing", "about"] {
        let url = format!("{SITE_URL}{uri}");
        store.save(b"<p>cached</p>", &url, SITE_URL).await.expect("saved");
    }

    let first = runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeSave)
        .await
        .expect("enqueue");
    assert!(matches!(first, MutationOutcome::Enqueued(_)));

    let second = runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeSave)
        .await
        .expect("enqueue");
    assert_eq!(second, MutationOutcome::Coalesced);
    assert_eq!(runtime.queue.len(), 1);
    assert!(runtime.mutex.is_held(&element_lock_key(1)));

    let summary = runtime.drain().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    assert!(!cached_file(root.path(), "blog/hello").exists());
    assert!(!cached_file(root.path(), "news/today").exists());
    assert!(!cached_file(root.path(), "listing").exists());
    assert!(cached_file(root.path(), "about").exists());
    assert!(!runtime.mutex.is_held(&element_lock_key(1)));
}

#[tokio::test]
async fn empty_relation_map_wipes_the_whole_cache() {
    let root = TempDir::new().expect("tempdir");
    let settings = settings(root.path(), &base_config(root.path()));
    let graph = Arc::new(MemoryContentGraph::default());
    let post = entry(1, "blog", "blog/hello");
    graph.insert_element(post.clone());
    let runtime = runtime(&settings, graph);

    let store = runtime.registry.cache.store();
    store
        .save(b"<p>a</p>", "https://example.com/about", SITE_URL)
        .await
        .expect("saved");

    let outcome = runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeDelete)
        .await
        .expect("enqueue");
    assert!(matches!(outcome, MutationOutcome::Enqueued(_)));
    assert!(runtime.mutex.is_held(INVALIDATE_ALL_LOCK));

    runtime.drain().await;

    assert!(!cached_file(root.path(), "about").exists());
    assert_eq!(runtime.registry.cache_stats().await.cached_pages, 0);
    assert!(!runtime.mutex.is_held(INVALIDATE_ALL_LOCK));
}

#[tokio::test]
async fn lock_is_released_when_the_element_is_gone() {
    let root = TempDir::new().expect("tempdir");
    let config = format!(
        "{}\n[cache.relations]\nblog = [\"/listing\"]\n",
        base_config(root.path())
    );
    let settings = settings(root.path(), &config);
    let graph = Arc::new(MemoryContentGraph::default());
    let post = entry(7, "blog", "blog/gone");
    graph.insert_element(post.clone());
    let runtime = runtime(&settings, graph.clone());

    runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeDelete)
        .await
        .expect("enqueue");
    graph.remove_element(7);

    let summary = runtime.drain().await;
    assert_eq!(summary.completed, 1);
    assert!(!runtime.mutex.is_held(&element_lock_key(7)));

    let again = runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeDelete)
        .await
        .expect("enqueue");
    assert!(matches!(again, MutationOutcome::Enqueued(_)));
}

#[tokio::test]
async fn invalidation_purges_stale_urls_from_the_cdn() {
    let server = MockServer::start_async().await;
    let purge = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/client/v4/zones/zone-1/purge_cache")
                .header("Authorization", "Bearer secret")
                .json_body(json!({ "files": ["https://example.com/blog/hello"] }));
            then.status(200).json_body(json!({ "success": true, "errors": [] }));
        })
        .await;

    let root = TempDir::new().expect("tempdir");
    let config = format!(
        "{}\n[cache.relations]\nblog = [\"pages\"]\n\n[cdn]\nenabled = true\napi_base_url = \"{}\"\nzone = \"zone-1\"\ntoken = \"secret\"\n",
        base_config(root.path()),
        server.url("/client/v4/"),
    );
    let settings = settings(root.path(), &config);
    let graph = Arc::new(MemoryContentGraph::default());
    let post = entry(1, "blog", "blog/hello");
    graph.insert_element(post.clone());
    let runtime = runtime(&settings, graph);

    runtime
        .registry
        .cache
        .on_element_mutation(&post, MutationEvent::BeforeSave)
        .await
        .expect("enqueue");
    let summary = runtime.drain().await;

    assert_eq!(summary.completed, 1);
    purge.assert_async().await;
}

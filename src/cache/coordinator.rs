//! Response capture and mutation-driven invalidation.
//!
//! Two entry points feed the cache. [`InvalidationCoordinator::on_response_ready`]
//! runs inside the request cycle and decides whether a rendered page is stored;
//! it never fails outward. [`InvalidationCoordinator::on_element_mutation`] runs
//! when content changes and enqueues at most one invalidation job per scope,
//! using the keyed mutex to coalesce bursts. The job itself lands in
//! [`InvalidationCoordinator::run_invalidation`].

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{
    config::CacheConfig,
    keys::CacheKeying,
    patterns::PatternSet,
    relations::{Resolution, SiteUrl, resolve},
    store::StaticCacheStore,
};
use crate::{
    application::{
        jobs::enqueue_invalidation_job,
        repos::{
            CdnError, CdnPurger, ContentGraph, JobQueue, MutexLock, PurgeOutcome, QueueError,
            RepoError,
        },
    },
    domain::{
        content::{Element, ElementId, SiteId},
        types::MutationEvent,
    },
};

pub const INVALIDATE_ALL_LOCK: &str = "quire:invalidate:all";
const SITEMAP_PATTERN: &str = "sitemap.xml";
const OK_STATUS: u16 = 200;
const TARGET: &str = "quire::cache::coordinator";

const METRIC_CACHE_SAVED: &str = "quire_cache_saved_total";
const METRIC_CACHE_SKIPPED: &str = "quire_cache_skipped_total";
const METRIC_CACHE_INVALIDATED: &str = "quire_cache_invalidated_total";
const METRIC_INVALIDATION_COALESCED: &str = "quire_invalidation_coalesced_total";

pub fn element_lock_key(id: ElementId) -> String {
    format!("quire:invalidate:element:{id}")
}

/// Payload of an invalidation job. Checked in order: element, all, urls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<SiteUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_class: Option<String>,
    #[serde(default)]
    pub all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutex_key: Option<String>,
}

impl InvalidationRequest {
    pub fn urls(urls: Vec<SiteUrl>) -> Self {
        Self {
            urls,
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Html,
    Template,
    Other,
}

/// What the capture hook needs to know about the request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub site_id: SiteId,
    /// Absolute request URL, including any query string.
    pub url: String,
    pub method: String,
    pub site_request: bool,
    pub console: bool,
    pub action: bool,
    pub preview: bool,
}

impl CapturedRequest {
    /// A plain same-site GET.
    pub fn get(site_id: SiteId, url: impl Into<String>) -> Self {
        Self {
            site_id,
            url: url.into(),
            method: "GET".to_string(),
            site_request: true,
            console: false,
            action: false,
            preview: false,
        }
    }

    fn has_query(&self) -> bool {
        let without_fragment = self.url.split('#').next().unwrap_or_default();
        without_fragment
            .split_once('?')
            .is_some_and(|(_, query)| !query.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CapturedResponse<'a> {
    pub status: u16,
    pub format: ResponseFormat,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSiteRequest,
    NotGet,
    QueryString,
    Console,
    Action,
    Preview,
    NotHtml,
    Status,
    Disabled,
    UnknownSite,
    ExcludedSite,
    Excluded,
    NotIncluded,
    Sitemap,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NotSiteRequest => "not_site_request",
            SkipReason::NotGet => "not_get",
            SkipReason::QueryString => "query_string",
            SkipReason::Console => "console",
            SkipReason::Action => "action",
            SkipReason::Preview => "preview",
            SkipReason::NotHtml => "not_html",
            SkipReason::Status => "status",
            SkipReason::Disabled => "disabled",
            SkipReason::UnknownSite => "unknown_site",
            SkipReason::ExcludedSite => "excluded_site",
            SkipReason::Excluded => "excluded",
            SkipReason::NotIncluded => "not_included",
            SkipReason::Sitemap => "sitemap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(PathBuf),
    Filtered(SkipReason),
    /// Write failed; already logged.
    SaveFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Ignored(&'static str),
    /// An invalidation for the same scope is already in flight.
    Coalesced,
    Enqueued(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub wiped: bool,
    pub deleted: usize,
    pub pagination_purged: usize,
    pub purged_urls: Vec<String>,
    pub purge: Option<PurgeOutcome>,
}

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cdn(#[from] CdnError),
}

pub struct InvalidationCoordinator {
    config: CacheConfig,
    store: StaticCacheStore,
    sitemap: PatternSet,
    graph: Arc<dyn ContentGraph>,
    mutex: Arc<dyn MutexLock>,
    queue: Arc<dyn JobQueue>,
    cdn: Option<Arc<dyn CdnPurger>>,
}

impl InvalidationCoordinator {
    pub fn new(
        config: CacheConfig,
        graph: Arc<dyn ContentGraph>,
        mutex: Arc<dyn MutexLock>,
        queue: Arc<dyn JobQueue>,
        cdn: Option<Arc<dyn CdnPurger>>,
    ) -> Self {
        let store = StaticCacheStore::new(config.base_path.clone());
        Self {
            config,
            store,
            sitemap: PatternSet::compile(&[SITEMAP_PATTERN]),
            graph,
            mutex,
            queue,
            cdn,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &StaticCacheStore {
        &self.store
    }

    /// Response-capture hook. Never fails: every problem ends as a skip or a logged miss.
    #[instrument(skip_all, fields(url = %request.url, site_id = request.site_id))]
    pub async fn on_response_ready(
        &self,
        request: &CapturedRequest,
        response: &CapturedResponse<'_>,
    ) -> CaptureOutcome {
        let site_base = match self.capture_filter(request, response) {
            Ok(site_base) => site_base,
            Err(reason) => {
                counter!(METRIC_CACHE_SKIPPED, "reason" => reason.as_str()).increment(1);
                debug!(target = TARGET, reason = reason.as_str(), "Not caching response");
                return CaptureOutcome::Filtered(reason);
            }
        };

        match self.store.save(response.body, &request.url, &site_base).await {
            Some(path) => {
                counter!(METRIC_CACHE_SAVED).increment(1);
                debug!(target = TARGET, path = %path.display(), "Cached page");
                CaptureOutcome::Saved(path)
            }
            None => CaptureOutcome::SaveFailed,
        }
    }

    /// Checks that depend only on the request, so callers can skip buffering the body.
    pub fn request_filter(&self, request: &CapturedRequest) -> Result<(), SkipReason> {
        if !request.site_request {
            return Err(SkipReason::NotSiteRequest);
        }
        if !request.method.eq_ignore_ascii_case("GET") {
            return Err(SkipReason::NotGet);
        }
        if request.has_query() {
            return Err(SkipReason::QueryString);
        }
        if request.console {
            return Err(SkipReason::Console);
        }
        if request.action {
            return Err(SkipReason::Action);
        }
        if request.preview {
            return Err(SkipReason::Preview);
        }
        Ok(())
    }

    fn capture_filter(
        &self,
        request: &CapturedRequest,
        response: &CapturedResponse<'_>,
    ) -> Result<String, SkipReason> {
        self.request_filter(request)?;
        if !matches!(response.format, ResponseFormat::Html | ResponseFormat::Template) {
            return Err(SkipReason::NotHtml);
        }
        if response.status != OK_STATUS {
            return Err(SkipReason::Status);
        }
        if !self.config.enabled {
            return Err(SkipReason::Disabled);
        }
        let site = self
            .config
            .site(request.site_id)
            .ok_or(SkipReason::UnknownSite)?;
        if self.config.is_site_excluded(site.id) {
            return Err(SkipReason::ExcludedSite);
        }

        let uri = CacheKeying::relative_uri(&request.url, &site.base_url);
        if self.config.exclude.matches(&uri) {
            return Err(SkipReason::Excluded);
        }
        if !self.config.include.is_empty() && !self.config.include.matches(&uri) {
            return Err(SkipReason::NotIncluded);
        }
        if self.sitemap.matches(&uri) {
            return Err(SkipReason::Sitemap);
        }

        Ok(site.base_url.clone())
    }

    /// Content-mutation hook: enqueue one invalidation job per scope.
    #[instrument(skip_all, fields(element_id = element.id, event = event.as_str()))]
    pub async fn on_element_mutation(
        &self,
        element: &Element,
        event: MutationEvent,
    ) -> Result<MutationOutcome, QueueError> {
        if !self.config.enabled {
            return Ok(MutationOutcome::Ignored("disabled"));
        }
        if !element.kind.is_recognized() {
            return Ok(MutationOutcome::Ignored("unrecognized_kind"));
        }
        if element.is_draft_or_revision() {
            return Ok(MutationOutcome::Ignored("draft_or_revision"));
        }
        if self.config.is_site_excluded(element.site_id) {
            return Ok(MutationOutcome::Ignored("excluded_site"));
        }

        let wipe = self.config.relations.is_empty();
        let key = if wipe {
            INVALIDATE_ALL_LOCK.to_string()
        } else {
            element_lock_key(element.id)
        };

        if !self.mutex.acquire(&key).await {
            counter!(METRIC_INVALIDATION_COALESCED).increment(1);
            debug!(target = TARGET, lock = %key, "Invalidation already pending");
            return Ok(MutationOutcome::Coalesced);
        }

        let request = if wipe {
            InvalidationRequest {
                all: true,
                mutex_key: Some(key.clone()),
                ..InvalidationRequest::default()
            }
        } else {
            InvalidationRequest {
                element_id: Some(element.id),
                element_class: Some(element.kind.class_name().to_string()),
                mutex_key: Some(key.clone()),
                ..InvalidationRequest::default()
            }
        };

        match enqueue_invalidation_job(self.queue.as_ref(), &request).await {
            Ok(job_id) => Ok(MutationOutcome::Enqueued(job_id)),
            Err(err) => {
                self.mutex.release(&key).await;
                Err(err)
            }
        }
    }

    /// Invalidation job body. The request's mutex key is released on every path.
    #[instrument(skip_all, fields(element_id = ?request.element_id, all = request.all))]
    pub async fn run_invalidation(
        &self,
        request: &InvalidationRequest,
    ) -> Result<InvalidationReport, InvalidationError> {
        let result = self.invalidate(request).await;
        if let Some(key) = request.mutex_key.as_deref() {
            self.mutex.release(key).await;
        }
        result
    }

    async fn invalidate(
        &self,
        request: &InvalidationRequest,
    ) -> Result<InvalidationReport, InvalidationError> {
        if let Some(element_id) = request.element_id {
            let instances = self.graph.element_in_all_sites(element_id).await?;
            if instances.is_empty() {
                debug!(target = TARGET, element_id, "Element no longer exists");
            }

            let mut urls = BTreeSet::new();
            for instance in &instances {
                match resolve(instance, &self.config.relations, self.graph.as_ref()).await? {
                    Resolution::InvalidateAll => return Ok(self.wipe().await),
                    Resolution::Urls(found) => urls.extend(found),
                }
            }
            let urls: Vec<SiteUrl> = urls.into_iter().collect();
            return self.invalidate_urls(&urls).await;
        }

        if request.all {
            return Ok(self.wipe().await);
        }

        self.invalidate_urls(&request.urls).await
    }

    /// Remove every cached page. The CDN is left alone.
    pub async fn wipe(&self) -> InvalidationReport {
        let wiped = self.store.clear_all().await;
        info!(target = TARGET, wiped, "Cleared static cache");
        InvalidationReport {
            wiped,
            ..InvalidationReport::default()
        }
    }

    /// Delete each URL, sweep pagination fragments, then purge the CDN.
    pub async fn invalidate_urls(
        &self,
        urls: &[SiteUrl],
    ) -> Result<InvalidationReport, InvalidationError> {
        let mut report = InvalidationReport::default();

        for site_url in urls {
            let Some(site) = self.config.site(site_url.site_id) else {
                warn!(
                    target = TARGET,
                    url = %site_url.url,
                    site_id = site_url.site_id,
                    "Skipping url of unknown site"
                );
                continue;
            };

            match self.store.delete(&site_url.url, &site.base_url).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    target = TARGET,
                    url = %site_url.url,
                    error = %err,
                    "Failed to delete cached page"
                ),
            }
            report.purged_urls.push(site.absolute_url(&site_url.url));
        }

        report.pagination_purged = self.store.purge_pagination_fragments().await;
        counter!(METRIC_CACHE_INVALIDATED).increment(report.deleted as u64);

        if let Some(cdn) = self.cdn.as_ref().filter(|_| !report.purged_urls.is_empty()) {
            let outcome = cdn.purge_urls(&report.purged_urls).await?;
            if !outcome.success {
                warn!(
                    target = TARGET,
                    message = outcome.message.as_deref().unwrap_or_default(),
                    errors = ?outcome.errors,
                    "CDN purge failed"
                );
            }
            report.purge = Some(outcome);
        }

        info!(
            target = TARGET,
            deleted = report.deleted,
            pagination_purged = report.pagination_purged,
            "Invalidated cached pages"
        );
        Ok(report)
    }
}

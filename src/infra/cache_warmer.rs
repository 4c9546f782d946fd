//! Cache warming over HTTP.
//!
//! Warming never writes cache files itself: it requests each page from the
//! live site so the capture layer stores the rendered response.

use std::{collections::HashSet, num::NonZeroUsize, time::Instant};

use futures::future::join_all;
use metrics::histogram;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::sitemap::fetch_sitemap_urls;
use crate::{config::Settings, domain::content::Site};

const TARGET: &str = "quire::infra::cache_warmer";
const METRIC_WARM_MS: &str = "quire_warm_ms";

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to request `{url}`: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{url}` answered with status {status}")]
    Status { url: String, status: StatusCode },
}

/// Progress after each finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SiteWarmer {
    client: Client,
    targets: Vec<Site>,
    sitemap_path: String,
}

impl SiteWarmer {
    pub fn new(client: Client, targets: Vec<Site>, sitemap_path: impl Into<String>) -> Self {
        Self {
            client,
            targets,
            sitemap_path: sitemap_path.into(),
        }
    }

    /// Warm the configured `warm_sites`, or the primary site when none are listed.
    pub fn from_settings(settings: &Settings, client: Client) -> Self {
        let targets: Vec<Site> = if settings.cache.warm_sites.is_empty() {
            vec![settings.primary_site().clone()]
        } else {
            settings
                .sites
                .iter()
                .filter(|site| settings.cache.warm_sites.contains(&site.id))
                .cloned()
                .collect()
        };
        Self::new(client, targets, settings.cache.sitemap_path.clone())
    }

    pub fn targets(&self) -> &[Site] {
        &self.targets
    }

    /// Homepage first, then every sitemap URL, per target site. Duplicates are dropped.
    pub async fn list_urls_to_warm(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for site in &self.targets {
            let home = site.absolute_url("");
            if seen.insert(home.clone()) {
                urls.push(home);
            }

            let sitemap = site.absolute_url(&self.sitemap_path);
            match fetch_sitemap_urls(&self.client, &sitemap).await {
                Ok(found) => {
                    debug!(target = TARGET, site_id = site.id, count = found.len(), "Read sitemap");
                    for url in found {
                        if seen.insert(url.clone()) {
                            urls.push(url);
                        }
                    }
                }
                Err(err) => warn!(
                    target = TARGET,
                    site_id = site.id,
                    url = %sitemap,
                    error = %err,
                    "Failed to read sitemap; warming homepage only"
                ),
            }
        }

        urls
    }

    /// Request `urls` in batches of `concurrency`, waiting for each batch before
    /// the next. Individual failures are logged and counted.
    pub async fn warm<F>(&self, urls: &[String], concurrency: NonZeroUsize, mut progress: F) -> WarmReport
    where
        F: FnMut(WarmProgress),
    {
        let started = Instant::now();
        let mut report = WarmReport {
            total: urls.len(),
            ..WarmReport::default()
        };

        for batch in urls.chunks(concurrency.get()) {
            let results = join_all(batch.iter().map(|url| self.warm_url(url))).await;
            for result in results {
                match result {
                    Ok(()) => report.succeeded += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(target = TARGET, error = %err, "Failed to warm url");
                    }
                }
            }
            progress(WarmProgress {
                completed: report.succeeded + report.failed,
                total: report.total,
            });
        }

        histogram!(METRIC_WARM_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = TARGET,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Cache warm finished"
        );
        report
    }

    async fn warm_url(&self, url: &str) -> Result<(), CacheWarmError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CacheWarmError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheWarmError::Status {
                url: url.to_string(),
                status,
            });
        }

        // Drain the body so the server finishes rendering.
        response
            .bytes()
            .await
            .map_err(|source| CacheWarmError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(())
    }
}

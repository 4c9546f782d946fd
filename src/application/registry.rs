//! Explicit wiring of the cache and media services.
//!
//! Controllers and job workers reach every service through a
//! [`ServiceRegistry`]; nothing is looked up globally.

use std::{num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::{
        jobs::{
            CacheWarmJobPayload, JobError, JobHandler, WarmStart, decode_payload,
            enqueue_cache_warm_job, enqueue_remove_transforms_job, process_cache_warm_job,
            process_invalidation_job, process_remove_transforms_job, process_transform_job,
        },
        repos::{CdnError, CdnPurger, JobDescriptor, JobQueue, MutexLock, PurgeOutcome, QueueError},
    },
    cache::{InvalidationCoordinator, InvalidationReport},
    domain::{content::VolumeId, types::JobType},
    infra::cache_warmer::SiteWarmer,
    media::{AssetLifecycleCoordinator, LifecycleError},
};

const TARGET: &str = "quire::application::registry";

/// What to purge from the CDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PurgeRequest {
    All { all: bool },
    Urls { urls: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_pages: usize,
}

#[derive(Clone)]
pub struct ServiceRegistry {
    pub cache: Arc<InvalidationCoordinator>,
    pub media: Arc<AssetLifecycleCoordinator>,
    pub warmer: SiteWarmer,
    pub warm_concurrency: NonZeroUsize,
    pub queue: Arc<dyn JobQueue>,
    pub mutex: Arc<dyn MutexLock>,
    pub cdn: Option<Arc<dyn CdnPurger>>,
}

impl ServiceRegistry {
    /// Remove every cached page.
    pub async fn clear_all(&self) -> InvalidationReport {
        self.cache.wipe().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cached_pages: self.cache.store().count_cached_pages().await,
        }
    }

    /// Enqueue a warm job unless one is already pending or running.
    pub async fn warm(&self, reason: Option<String>) -> Result<WarmStart, QueueError> {
        enqueue_cache_warm_job(self.queue.as_ref(), self.mutex.as_ref(), reason).await
    }

    pub async fn purge_cdn(&self, request: &PurgeRequest) -> Result<PurgeOutcome, CdnError> {
        let cdn = self
            .cdn
            .as_ref()
            .ok_or(CdnError::NotConfigured { missing: "cdn.enabled" })?;
        match request {
            PurgeRequest::All { all: true } => cdn.purge_all().await,
            PurgeRequest::All { all: false } => cdn.purge_urls(&[]).await,
            PurgeRequest::Urls { urls } => cdn.purge_urls(urls).await,
        }
    }

    /// Enqueue transform jobs for the matching assets; returns how many were enqueued.
    pub async fn transform_images(
        &self,
        forced: bool,
        volumes: &[VolumeId],
    ) -> Result<usize, LifecycleError> {
        self.media.transform_images(forced, volumes).await
    }

    /// Enqueue removal of every asset's transforms.
    pub async fn remove_transforms(&self) -> Result<String, QueueError> {
        enqueue_remove_transforms_job(self.queue.as_ref()).await
    }
}

#[async_trait]
impl JobHandler for ServiceRegistry {
    async fn handle(&self, job: &JobDescriptor) -> Result<(), JobError> {
        info!(
            target = TARGET,
            job_type = job.job_type.as_str(),
            description = %job.description,
            "running job"
        );
        match job.job_type {
            JobType::InvalidateCache => {
                process_invalidation_job(decode_payload(job)?, &self.cache).await
            }
            JobType::WarmCache => {
                let payload: CacheWarmJobPayload = decode_payload(job)?;
                process_cache_warm_job(
                    payload,
                    &self.warmer,
                    self.warm_concurrency,
                    self.mutex.as_ref(),
                )
                .await
            }
            JobType::TransformMedia => process_transform_job(decode_payload(job)?, &self.media).await,
            JobType::RemoveTransforms => process_remove_transforms_job(&self.media).await,
        }
    }

    async fn abandon(&self, job: &JobDescriptor) {
        let Some(key) = job
            .payload
            .get("mutex_key")
            .and_then(serde_json::Value::as_str)
        else {
            return;
        };
        warn!(
            target = TARGET,
            job_type = job.job_type.as_str(),
            lock = key,
            "releasing lock of abandoned job"
        );
        self.mutex.release(key).await;
    }
}

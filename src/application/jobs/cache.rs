use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::repos::{JobQueue, MutexLock, QueueError},
    cache::{InvalidationCoordinator, InvalidationRequest},
    domain::types::JobType,
    infra::cache_warmer::SiteWarmer,
};

use super::{
    context::{JobError, job_failed},
    queue::enqueue_job,
};

pub const INVALIDATION_JOB_TTR: Duration = Duration::from_secs(300);
pub const INVALIDATION_JOB_DESCRIPTION: &str = "Clearing static cache";
pub const WARM_JOB_TTR: Duration = Duration::from_secs(600);
pub const WARM_JOB_DESCRIPTION: &str = "Warming urls";
pub const WARM_LOCK: &str = "quire:warm";

/// Enqueue an invalidation. Not retried: the next mutation invalidates again.
pub async fn enqueue_invalidation_job<Q: JobQueue + ?Sized>(
    queue: &Q,
    request: &InvalidationRequest,
) -> Result<String, QueueError> {
    enqueue_job(
        queue,
        JobType::InvalidateCache,
        request,
        INVALIDATION_JOB_TTR,
        false,
        INVALIDATION_JOB_DESCRIPTION,
    )
    .await
}

pub async fn process_invalidation_job(
    request: InvalidationRequest,
    coordinator: &InvalidationCoordinator,
) -> Result<(), JobError> {
    let report = coordinator
        .run_invalidation(&request)
        .await
        .map_err(job_failed)?;

    info!(
        target = "application::jobs::process_invalidation_job",
        element_id = ?request.element_id,
        wiped = report.wiped,
        deleted = report.deleted,
        purged = report.purged_urls.len(),
        "invalidation job finished"
    );
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheWarmJobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutex_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmStart {
    Started(String),
    AlreadyRunning,
}

/// Enqueue a warm job unless one is already pending or running.
///
/// The `quire:warm` lock is held until the job completes; every path that does
/// not end with an enqueued job releases it again.
pub async fn enqueue_cache_warm_job<Q, M>(
    queue: &Q,
    mutex: &M,
    reason: Option<String>,
) -> Result<WarmStart, QueueError>
where
    Q: JobQueue + ?Sized,
    M: MutexLock + ?Sized,
{
    if !mutex.acquire(WARM_LOCK).await {
        return Ok(WarmStart::AlreadyRunning);
    }

    let active = match queue.active_descriptions().await {
        Ok(active) => active,
        Err(err) => {
            mutex.release(WARM_LOCK).await;
            return Err(err);
        }
    };
    if active.iter().any(|description| description == WARM_JOB_DESCRIPTION) {
        mutex.release(WARM_LOCK).await;
        return Ok(WarmStart::AlreadyRunning);
    }

    let payload = CacheWarmJobPayload {
        reason,
        mutex_key: Some(WARM_LOCK.to_string()),
    };
    match enqueue_job(
        queue,
        JobType::WarmCache,
        &payload,
        WARM_JOB_TTR,
        true,
        WARM_JOB_DESCRIPTION,
    )
    .await
    {
        Ok(id) => Ok(WarmStart::Started(id)),
        Err(err) => {
            mutex.release(WARM_LOCK).await;
            Err(err)
        }
    }
}

/// Warm every listed URL in batches. Failed fetches are logged by the warmer;
/// the lock named in the payload is released when the batches are done.
pub async fn process_cache_warm_job<M: MutexLock + ?Sized>(
    payload: CacheWarmJobPayload,
    warmer: &SiteWarmer,
    concurrency: NonZeroUsize,
    mutex: &M,
) -> Result<(), JobError> {
    info!(
        target = "application::jobs::process_cache_warm_job",
        reason = payload.reason.as_deref().unwrap_or("unspecified"),
        "starting cache warm"
    );

    let urls = warmer.list_urls_to_warm().await;
    let report = warmer
        .warm(&urls, concurrency, |progress| {
            info!(
                target = "application::jobs::process_cache_warm_job",
                completed = progress.completed,
                total = progress.total,
                "warm progress"
            );
        })
        .await;

    if report.failed > 0 {
        warn!(
            target = "application::jobs::process_cache_warm_job",
            failed = report.failed,
            total = report.total,
            "some urls could not be warmed"
        );
    }

    if let Some(key) = payload.mutex_key.as_deref() {
        mutex.release(key).await;
    }
    Ok(())
}

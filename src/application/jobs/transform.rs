use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    application::{
        jobs::context::{JobError, job_failed},
        repos::{JobQueue, QueueError},
    },
    domain::{content::ElementId, transforms::MediaTransformSpec, types::JobType},
    media::AssetLifecycleCoordinator,
};

use super::queue::enqueue_job;

pub const TRANSFORM_JOB_TTR: Duration = Duration::from_secs(300);
pub const TRANSFORM_JOB_DESCRIPTION: &str = "Transforming media";
pub const REMOVE_TRANSFORMS_JOB_DESCRIPTION: &str = "Removing media transforms";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformJobPayload {
    pub asset_id: ElementId,
    #[serde(default)]
    pub forced: bool,
    /// Empty means the configured presets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specs: Vec<MediaTransformSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveTransformsJobPayload {}

/// Enqueue a per-asset transform job. Not retried: the next save or a batch run tries again.
pub async fn enqueue_transform_job<Q: JobQueue + ?Sized>(
    queue: &Q,
    payload: &TransformJobPayload,
) -> Result<String, QueueError> {
    enqueue_job(
        queue,
        JobType::TransformMedia,
        payload,
        TRANSFORM_JOB_TTR,
        false,
        TRANSFORM_JOB_DESCRIPTION,
    )
    .await
}

pub async fn enqueue_remove_transforms_job<Q: JobQueue + ?Sized>(
    queue: &Q,
) -> Result<String, QueueError> {
    enqueue_job(
        queue,
        JobType::RemoveTransforms,
        &RemoveTransformsJobPayload::default(),
        TRANSFORM_JOB_TTR,
        false,
        REMOVE_TRANSFORMS_JOB_DESCRIPTION,
    )
    .await
}

pub async fn process_transform_job(
    payload: TransformJobPayload,
    lifecycle: &AssetLifecycleCoordinator,
) -> Result<(), JobError> {
    let outcome = lifecycle
        .transform_image(payload.asset_id, payload.forced, &payload.specs)
        .await
        .map_err(job_failed)?;

    info!(
        target = "application::jobs::process_transform_job",
        asset_id = payload.asset_id,
        outcome = outcome.as_str(),
        "transform job finished"
    );
    Ok(())
}

pub async fn process_remove_transforms_job(
    lifecycle: &AssetLifecycleCoordinator,
) -> Result<(), JobError> {
    let removed = lifecycle.remove_transforms().await.map_err(job_failed)?;
    info!(
        target = "application::jobs::process_remove_transforms_job",
        removed,
        "removed media transforms"
    );
    Ok(())
}

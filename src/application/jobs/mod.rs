mod cache;
mod context;
mod queue;
mod transform;

pub use cache::{
    CacheWarmJobPayload, INVALIDATION_JOB_DESCRIPTION, INVALIDATION_JOB_TTR, WARM_JOB_DESCRIPTION,
    WARM_JOB_TTR, WARM_LOCK, WarmStart, enqueue_cache_warm_job, enqueue_invalidation_job,
    process_cache_warm_job, process_invalidation_job,
};
pub use context::{JobError, JobHandler, job_failed};
pub use queue::{decode_payload, enqueue_job};
pub use transform::{
    REMOVE_TRANSFORMS_JOB_DESCRIPTION, RemoveTransformsJobPayload, TRANSFORM_JOB_DESCRIPTION,
    TRANSFORM_JOB_TTR, TransformJobPayload, enqueue_remove_transforms_job, enqueue_transform_job,
    process_remove_transforms_job, process_transform_job,
};

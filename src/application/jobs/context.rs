use async_trait::async_trait;
use thiserror::Error;

use crate::application::repos::JobDescriptor;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("job failed: {0}")]
    Failed(#[source] BoxError),
}

/// Convert any error into a [`JobError::Failed`].
pub fn job_failed<E>(err: E) -> JobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    JobError::Failed(Box::new(err))
}

/// Executes queued jobs; implemented by the service registry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobDescriptor) -> Result<(), JobError>;

    /// Called once a job is dropped after being cancelled at its time-to-run.
    async fn abandon(&self, _job: &JobDescriptor) {}
}

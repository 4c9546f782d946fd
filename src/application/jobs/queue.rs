use std::time::Duration;

use crate::{
    application::repos::{JobDescriptor, JobQueue, QueueError},
    domain::types::JobType,
};

/// Enqueue a job with the provided payload, returning the queue-assigned id.
pub async fn enqueue_job<Q, P>(
    queue: &Q,
    job_type: JobType,
    payload: &P,
    ttr: Duration,
    retryable: bool,
    description: &str,
) -> Result<String, QueueError>
where
    Q: JobQueue + ?Sized,
    P: serde::Serialize,
{
    let payload = serde_json::to_value(payload)?;
    let descriptor = JobDescriptor {
        job_type,
        payload,
        ttr,
        retryable,
        description: description.to_string(),
    };

    queue.push(descriptor).await
}

/// Decode a descriptor payload into its typed form.
pub fn decode_payload<P>(job: &JobDescriptor) -> Result<P, serde_json::Error>
where
    P: serde::de::DeserializeOwned,
{
    serde_json::from_value(job.payload.clone())
}

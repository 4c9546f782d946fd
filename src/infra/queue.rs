//! In-process job queue.
//!
//! Jobs run one at a time per worker under their time-to-run. Retryable jobs
//! are requeued at the back after a failure until [`MAX_ATTEMPTS`] is reached;
//! other failures are logged and dropped. A job dropped after running out of
//! time is handed to [`JobHandler::abandon`] so it can release what it holds.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::{sync::Notify, task::JoinHandle, time::timeout};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    application::{
        jobs::JobHandler,
        repos::{JobDescriptor, JobQueue, QueueError},
    },
    cache::lock::mutex_lock,
};

pub const MAX_ATTEMPTS: u32 = 3;

const TARGET: &str = "quire::infra::queue";

#[derive(Debug, Clone)]
struct QueuedJob {
    id: String,
    job: JobDescriptor,
    attempt: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    running: BTreeMap<String, String>,
}

/// Counts from a [`LocalJobQueue::run_pending`] drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

enum RunOutcome {
    Completed,
    Retried,
    Failed,
}

#[derive(Debug, Default)]
pub struct LocalJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl LocalJobQueue {
    /// Number of jobs waiting to run.
    pub fn len(&self) -> usize {
        mutex_lock(&self.state, TARGET, "len").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of waiting jobs in run order.
    pub fn pending(&self) -> Vec<JobDescriptor> {
        mutex_lock(&self.state, TARGET, "pending")
            .pending
            .iter()
            .map(|queued| queued.job.clone())
            .collect()
    }

    /// Run jobs until the queue is empty, including jobs enqueued by the jobs
    /// themselves and retries.
    pub async fn run_pending(&self, handler: &dyn JobHandler) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Some(queued) = self.take_next() {
            match self.execute(queued, handler).await {
                RunOutcome::Completed => summary.completed += 1,
                RunOutcome::Retried => summary.retried += 1,
                RunOutcome::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Spawn a worker that runs jobs as they arrive. Stop it by aborting the handle.
    pub fn spawn_worker(self: &Arc<Self>, name: String, handler: Arc<dyn JobHandler>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            debug!(target = TARGET, worker = %name, "job worker started");
            loop {
                let queued = queue.next_job().await;
                queue.execute(queued, handler.as_ref()).await;
            }
        })
    }

    async fn next_job(&self) -> QueuedJob {
        loop {
            if let Some(queued) = self.take_next() {
                return queued;
            }
            self.notify.notified().await;
        }
    }

    fn take_next(&self) -> Option<QueuedJob> {
        let mut state = mutex_lock(&self.state, TARGET, "take_next");
        let queued = state.pending.pop_front()?;
        state
            .running
            .insert(queued.id.clone(), queued.job.description.clone());
        Some(queued)
    }

    async fn execute(&self, queued: QueuedJob, handler: &dyn JobHandler) -> RunOutcome {
        let job_type = queued.job.job_type.as_str();
        let result = timeout(queued.job.ttr, handler.handle(&queued.job)).await;

        mutex_lock(&self.state, TARGET, "execute").running.remove(&queued.id);

        let (failure, timed_out) = match result {
            Ok(Ok(())) => {
                debug!(target = TARGET, job_id = %queued.id, job_type, "job completed");
                return RunOutcome::Completed;
            }
            Ok(Err(err)) => (err.to_string(), false),
            Err(_) => (format!("exceeded time-to-run of {:?}", queued.job.ttr), true),
        };

        if queued.job.retryable && queued.attempt < MAX_ATTEMPTS {
            warn!(
                target = TARGET,
                job_id = %queued.id,
                job_type,
                attempt = queued.attempt,
                error = %failure,
                "job failed; retrying"
            );
            self.requeue(QueuedJob {
                attempt: queued.attempt + 1,
                ..queued
            });
            return RunOutcome::Retried;
        }

        error!(
            target = TARGET,
            job_id = %queued.id,
            job_type,
            attempt = queued.attempt,
            error = %failure,
            "job failed"
        );
        // The handler was cancelled mid-run and never reached its own cleanup.
        if timed_out {
            handler.abandon(&queued.job).await;
        }
        RunOutcome::Failed
    }

    fn requeue(&self, queued: QueuedJob) {
        mutex_lock(&self.state, TARGET, "requeue")
            .pending
            .push_back(queued);
        self.notify.notify_one();
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn push(&self, job: JobDescriptor) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        debug!(
            target = TARGET,
            job_id = %id,
            job_type = job.job_type.as_str(),
            "job enqueued"
        );
        self.requeue(QueuedJob {
            id: id.clone(),
            job,
            attempt: 1,
        });
        Ok(id)
    }

    async fn active_descriptions(&self) -> Result<Vec<String>, QueueError> {
        let state = mutex_lock(&self.state, TARGET, "active_descriptions");
        Ok(state
            .pending
            .iter()
            .map(|queued| queued.job.description.clone())
            .chain(state.running.values().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::{
        application::jobs::{JobError, job_failed},
        domain::types::JobType,
    };

    #[derive(Default)]
    struct FailingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _job: &JobDescriptor) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(job_failed(std::io::Error::other("boom")))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, _job: &JobDescriptor) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct StalledHandler {
        abandoned: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for StalledHandler {
        async fn handle(&self, _job: &JobDescriptor) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_secs(900)).await;
            Ok(())
        }

        async fn abandon(&self, _job: &JobDescriptor) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job(retryable: bool, ttr: Duration) -> JobDescriptor {
        JobDescriptor {
            job_type: JobType::WarmCache,
            payload: serde_json::json!({}),
            ttr,
            retryable,
            description: "Warming urls".to_string(),
        }
    }

    #[tokio::test]
    async fn retryable_jobs_run_up_to_the_attempt_limit() {
        let queue = LocalJobQueue::default();
        let handler = FailingHandler::default();
        queue
            .push(job(true, Duration::from_secs(5)))
            .await
            .expect("push");

        let summary = queue.run_pending(&handler).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
        assert_eq!(
            summary,
            DrainSummary {
                completed: 0,
                retried: 2,
                failed: 1
            }
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn non_retryable_jobs_fail_once() {
        let queue = LocalJobQueue::default();
        let handler = FailingHandler::default();
        queue
            .push(job(false, Duration::from_secs(5)))
            .await
            .expect("push");

        let summary = queue.run_pending(&handler).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn jobs_past_their_time_to_run_are_abandoned() {
        let queue = LocalJobQueue::default();
        queue
            .push(job(false, Duration::from_millis(50)))
            .await
            .expect("push");

        let summary = queue.run_pending(&SlowHandler).await;
        assert_eq!(summary.failed, 1);
        assert!(queue.active_descriptions().await.expect("active").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_jobs_are_abandoned_after_the_last_attempt() {
        let queue = LocalJobQueue::default();
        let handler = StalledHandler::default();
        queue
            .push(job(true, Duration::from_secs(600)))
            .await
            .expect("push");

        let summary = queue.run_pending(&handler).await;
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_jobs_are_reported_as_active() {
        let queue = LocalJobQueue::default();
        queue
            .push(job(true, Duration::from_secs(5)))
            .await
            .expect("push");
        assert_eq!(
            queue.active_descriptions().await.expect("active"),
            vec!["Warming urls".to_string()]
        );
        assert_eq!(queue.len(), 1);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory queue implementation.
//!
//! Reference implementation of the queue port: per-queue FIFO with a single
//! delivery loop per consumer, backoff-delayed retry successors, and
//! dead-lettering.  Metadata recording failures are logged and never fail
//! the delivery path.

use crate::metadata::QueueMetadataStore;
use crate::{
    AttemptKind, ConsumerHandle, JobAttempt, JobHandler, JobStatus, PublishOptions, QueueError,
    QueueJob, QueuePort,
};
use async_trait::async_trait;
use chrono::Utc;
use loom_resilience::RetryPolicy;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    notify: Arc<Notify>,
}

struct QueueInner {
    queues: Mutex<HashMap<String, QueueState>>,
    jobs: Mutex<HashMap<String, QueueJob>>,
    metadata: Arc<dyn QueueMetadataStore>,
    backoff: RetryPolicy,
    default_max_attempts: u32,
}

/// In-memory [`QueuePort`] implementation.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<QueueInner>,
}

impl InMemoryQueue {
    /// Create a queue with the given metadata store, retry backoff schedule,
    /// and default attempt budget.
    #[must_use]
    pub fn new(
        metadata: Arc<dyn QueueMetadataStore>,
        backoff: RetryPolicy,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queues: Mutex::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                metadata,
                backoff,
                default_max_attempts: default_max_attempts.max(1),
            }),
        }
    }

    /// Fetch a snapshot of a job by id.
    pub async fn job(&self, job_id: &str) -> Option<QueueJob> {
        self.inner.jobs.lock().await.get(job_id).cloned()
    }

    /// Dead-lettered jobs for a queue, preserved for inspection.
    pub async fn dead_letter(&self, queue: &str) -> Vec<QueueJob> {
        let jobs = self.inner.jobs.lock().await;
        let mut out: Vec<QueueJob> = jobs
            .values()
            .filter(|j| j.queue_name == queue && j.status == JobStatus::Dead)
            .cloned()
            .collect();
        out.sort_by_key(|j| j.enqueued_at);
        out
    }

    async fn record_job(&self, job: &QueueJob) {
        if let Err(e) = self.inner.metadata.record_job(job).await {
            warn!(target: "loom.queue", job_id = %job.job_id, error = %e, "metadata record failed");
        }
    }

    async fn record_attempt(&self, job_id: &str, attempt: JobAttempt) {
        if let Err(e) = self.inner.metadata.record_attempt(job_id, attempt).await {
            warn!(target: "loom.queue", %job_id, error = %e, "attempt record failed");
        }
    }

    async fn enqueue_ready(&self, job_id: &str) {
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let Some(job) = jobs.get_mut(job_id) else {
                return;
            };
            job.status = JobStatus::Queued;
            job.clone()
        };
        self.record_job(&job).await;
        let mut queues = self.inner.queues.lock().await;
        let state = queues.entry(job.queue_name.clone()).or_default();
        state.pending.push_back(job_id.to_string());
        state.notify.notify_one();
    }

    async fn pop_ready(&self, queue: &str) -> Option<QueueJob> {
        let job_id = {
            let mut queues = self.inner.queues.lock().await;
            queues.get_mut(queue)?.pending.pop_front()?
        };
        let mut jobs = self.inner.jobs.lock().await;
        let job = jobs.get_mut(&job_id)?;
        job.status = JobStatus::Active;
        job.attempts.push(JobAttempt {
            kind: AttemptKind::Started,
            timestamp: Utc::now(),
            worker_id: None,
            duration_ms: None,
            error: None,
        });
        Some(job.clone())
    }

    /// Milliseconds since the most recent `Started` attempt.
    fn elapsed_ms(job: &QueueJob) -> Option<u64> {
        job.attempts
            .iter()
            .rev()
            .find(|a| a.kind == AttemptKind::Started)
            .map(|a| {
                Utc::now()
                    .signed_duration_since(a.timestamp)
                    .num_milliseconds()
                    .max(0) as u64
            })
    }
}

#[async_trait]
impl QueuePort for InMemoryQueue {
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        opts: PublishOptions,
    ) -> Result<String, QueueError> {
        let job = QueueJob {
            job_id: Uuid::new_v4().to_string(),
            queue_name: queue.to_string(),
            payload,
            attempt_number: 1,
            max_attempts: opts.max_attempts.unwrap_or(self.inner.default_max_attempts),
            status: if opts.delay.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Queued
            },
            attempts: Vec::new(),
            enqueued_at: Utc::now(),
        };
        let job_id = job.job_id.clone();
        self.inner.jobs.lock().await.insert(job_id.clone(), job.clone());
        self.record_job(&job).await;

        match opts.delay {
            Some(delay) => {
                let this = self.clone();
                let id = job_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.enqueue_ready(&id).await;
                });
            }
            None => {
                let mut queues = self.inner.queues.lock().await;
                let state = queues.entry(queue.to_string()).or_default();
                state.pending.push_back(job_id.clone());
                state.notify.notify_one();
            }
        }
        debug!(target: "loom.queue", %queue, %job_id, "published");
        Ok(job_id)
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<ConsumerHandle, QueueError> {
        let notify = {
            let mut queues = self.inner.queues.lock().await;
            Arc::clone(&queues.entry(queue.to_string()).or_default().notify)
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let this = self.clone();
        let queue = queue.to_string();

        let task = tokio::spawn(async move {
            loop {
                // Drain everything ready before going back to sleep.
                while let Some(job) = this.pop_ready(&queue).await {
                    let job_id = job.job_id.clone();
                    this.record_job(&job).await;
                    if let Some(started) = job.attempts.last().cloned() {
                        this.record_attempt(&job_id, started).await;
                    }

                    if let Err(e) = handler.handle(job).await {
                        // The handler owns ack/fail; only cover for it if
                        // the job was left active.
                        let still_active = this
                            .job(&job_id)
                            .await
                            .is_some_and(|j| j.status == JobStatus::Active);
                        if still_active {
                            warn!(target: "loom.queue", %job_id, error = %e, "handler error, failing job");
                            let _ = this.fail(&job_id, &e.to_string(), true).await;
                        }
                    }
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(ConsumerHandle::new(shutdown_tx, task))
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let job = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs.get_mut(job_id).ok_or_else(|| QueueError::UnknownJob {
                job_id: job_id.to_string(),
            })?;
            if job.status != JobStatus::Active {
                return Err(QueueError::InvalidStatus {
                    job_id: job_id.to_string(),
                    status: job.status,
                    expected: JobStatus::Active,
                });
            }
            job.status = JobStatus::Completed;
            let attempt = JobAttempt {
                kind: AttemptKind::Succeeded,
                timestamp: Utc::now(),
                worker_id: None,
                duration_ms: Self::elapsed_ms(job),
                error: None,
            };
            job.attempts.push(attempt);
            job.clone()
        };
        self.record_job(&job).await;
        if let Some(attempt) = job.attempts.last().cloned() {
            self.record_attempt(job_id, attempt).await;
        }
        debug!(target: "loom.queue", %job_id, "acked");
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<Option<String>, QueueError> {
        let (job, successor) = {
            let mut jobs = self.inner.jobs.lock().await;
            let job = jobs.get_mut(job_id).ok_or_else(|| QueueError::UnknownJob {
                job_id: job_id.to_string(),
            })?;
            if job.status != JobStatus::Active {
                return Err(QueueError::InvalidStatus {
                    job_id: job_id.to_string(),
                    status: job.status,
                    expected: JobStatus::Active,
                });
            }
            let attempt = JobAttempt {
                kind: AttemptKind::Failed,
                timestamp: Utc::now(),
                worker_id: None,
                duration_ms: Self::elapsed_ms(job),
                error: Some(error.to_string()),
            };
            job.attempts.push(attempt);

            let exhausted = job.attempt_number >= job.max_attempts;
            if retry && !exhausted {
                job.status = JobStatus::Failed;
                let successor = QueueJob {
                    job_id: Uuid::new_v4().to_string(),
                    queue_name: job.queue_name.clone(),
                    payload: job.payload.clone(),
                    attempt_number: job.attempt_number + 1,
                    max_attempts: job.max_attempts,
                    status: JobStatus::Delayed,
                    attempts: Vec::new(),
                    enqueued_at: Utc::now(),
                };
                let job = job.clone();
                jobs.insert(successor.job_id.clone(), successor.clone());
                (job, Some(successor))
            } else {
                job.status = JobStatus::Dead;
                (job.clone(), None)
            }
        };
        self.record_job(&job).await;
        if let Some(attempt) = job.attempts.last().cloned() {
            self.record_attempt(job_id, attempt).await;
        }

        match successor {
            Some(successor) => {
                self.record_job(&successor).await;
                let delay = self.inner.backoff.delay_for(job.attempt_number);
                debug!(
                    target: "loom.queue",
                    %job_id,
                    successor = %successor.job_id,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                let this = self.clone();
                let id = successor.job_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.enqueue_ready(&id).await;
                });
                Ok(Some(successor.job_id))
            }
            None => {
                warn!(target: "loom.queue", %job_id, %error, "dead-lettered");
                Ok(None)
            }
        }
    }
}

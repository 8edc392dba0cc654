// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job metadata store.
//!
//! Every job transition and attempt is recorded here; queue statistics are
//! derived from this store, never from the live queue structures.

use crate::{JobAttempt, JobStatus, QueueJob};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Statistics for one queue, derived from recorded jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Every job ever recorded for the queue.
    pub total_jobs: u64,
    /// Jobs currently queued or waiting out a retry delay.
    pub waiting_jobs: u64,
    /// Jobs currently held by a consumer.
    pub active_jobs: u64,
    /// Jobs acknowledged successfully.
    pub completed_jobs: u64,
    /// Jobs that failed (including those that spawned retries).
    pub failed_jobs: u64,
    /// Jobs whose retry budget is spent.
    pub dead_jobs: u64,
}

/// Port over the job metadata backend.
///
/// Attempt history is owned by the store and built exclusively through
/// [`record_attempt`](Self::record_attempt); `record_job` upserts the job's
/// fields and status without touching recorded attempts.
#[async_trait]
pub trait QueueMetadataStore: Send + Sync {
    /// Upsert the current snapshot of a job (status, attempt number, …).
    async fn record_job(&self, job: &QueueJob) -> anyhow::Result<()>;

    /// Append an attempt record to a job's history.
    async fn record_attempt(&self, job_id: &str, attempt: JobAttempt) -> anyhow::Result<()>;

    /// Every recorded job for `queue`, oldest first.
    async fn query(&self, queue: &str) -> anyhow::Result<Vec<QueueJob>>;

    /// Derived statistics for `queue`.
    async fn stats(&self, queue: &str) -> anyhow::Result<QueueStats>;
}

/// In-memory [`QueueMetadataStore`].
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    jobs: RwLock<HashMap<String, QueueJob>>,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueMetadataStore for InMemoryMetadataStore {
    async fn record_job(&self, job: &QueueJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.job_id) {
            Some(existing) => {
                let attempts = std::mem::take(&mut existing.attempts);
                *existing = job.clone();
                existing.attempts = attempts;
            }
            None => {
                let mut snapshot = job.clone();
                snapshot.attempts.clear();
                jobs.insert(job.job_id.clone(), snapshot);
            }
        }
        Ok(())
    }

    async fn record_attempt(&self, job_id: &str, attempt: JobAttempt) -> anyhow::Result<()> {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.attempts.push(attempt);
        }
        Ok(())
    }

    async fn query(&self, queue: &str) -> anyhow::Result<Vec<QueueJob>> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<QueueJob> = jobs
            .values()
            .filter(|j| j.queue_name == queue)
            .cloned()
            .collect();
        out.sort_by_key(|j| j.enqueued_at);
        Ok(out)
    }

    async fn stats(&self, queue: &str) -> anyhow::Result<QueueStats> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in jobs.values().filter(|j| j.queue_name == queue) {
            stats.total_jobs += 1;
            match job.status {
                JobStatus::Queued | JobStatus::Delayed => stats.waiting_jobs += 1,
                JobStatus::Active => stats.active_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Dead => {
                    stats.failed_jobs += 1;
                    stats.dead_jobs += 1;
                }
            }
        }
        Ok(stats)
    }
}

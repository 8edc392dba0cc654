// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-queue
//!
//! Durable, at-least-once message delivery.
//!
//! Responsibilities:
//! - the queue port: `publish` / `consume` / `ack` / `fail`
//! - FIFO delivery within a single queue (independent queues are unordered)
//! - retry re-enqueue with exponential backoff, dead-lettering after the
//!   attempt budget is spent
//! - a metadata store recording every job transition and attempt; stats are
//!   derived from the metadata store, never from the live queue

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-memory queue implementation.
pub mod memory;
/// Job metadata store port and in-memory implementation.
pub mod metadata;

pub use memory::InMemoryQueue;
pub use metadata::{InMemoryMetadataStore, QueueMetadataStore, QueueStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Job model
// ---------------------------------------------------------------------------

/// Delivery status of a queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Handed to a consumer.
    Active,
    /// Acknowledged successfully.
    Completed,
    /// Failed; a retry job may have been minted.
    Failed,
    /// Waiting out a retry backoff before re-entering the queue.
    Delayed,
    /// Retry budget spent; preserved for inspection.
    Dead,
}

/// What a single attempt record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    /// The job was handed to a worker.
    Started,
    /// The job was acknowledged.
    Succeeded,
    /// The job failed.
    Failed,
}

/// One entry in a job's attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttempt {
    /// What happened.
    pub kind: AttemptKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Worker that held the job, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Time from start to terminal record, for terminal attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error text for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A job travelling through a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    /// Unique job identifier (retries mint a fresh one).
    pub job_id: String,
    /// Queue the job belongs to.
    pub queue_name: String,
    /// Opaque payload.
    pub payload: Value,
    /// 1-based attempt number of this job.
    pub attempt_number: u32,
    /// Attempt budget across the retry chain.
    pub max_attempts: u32,
    /// Current delivery status.
    pub status: JobStatus,
    /// Attempt history for this job.
    #[serde(default)]
    pub attempts: Vec<JobAttempt>,
    /// When the job entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// Options for [`QueuePort::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Attempt budget override (defaults to the queue's configured budget).
    pub max_attempts: Option<u32>,
    /// Initial delivery delay.
    pub delay: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced job does not exist.
    #[error("unknown job: {job_id}")]
    UnknownJob {
        /// The missing job id.
        job_id: String,
    },
    /// The job is not in a state that allows the operation.
    #[error("job {job_id} is {status:?}, expected {expected:?}")]
    InvalidStatus {
        /// The job id.
        job_id: String,
        /// Its current status.
        status: JobStatus,
        /// The status the operation requires.
        expected: JobStatus,
    },
    /// The queue backend failed.
    #[error("queue backend failed: {0}")]
    Backend(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Consumer callback invoked once per delivered job.
///
/// The handler owns acknowledgement: it calls [`QueuePort::ack`] or
/// [`QueuePort::fail`] for the job it was given.  If it returns an error
/// while the job is still active, the consumer fails the job on its behalf
/// with retry enabled.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivered job.
    async fn handle(&self, job: QueueJob) -> anyhow::Result<()>;
}

/// Handle to a running consumer; stops the delivery loop when asked.
pub struct ConsumerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    pub(crate) fn new(
        shutdown: tokio::sync::watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self { shutdown, task }
    }

    /// Stop the consumer and wait for its loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Port over a durable queue backend.
///
/// Guarantees: at-least-once delivery and FIFO within a single queue.
#[async_trait]
pub trait QueuePort: Send + Sync {
    /// Enqueue a payload, returning the new job id.
    async fn publish(
        &self,
        queue: &str,
        payload: Value,
        opts: PublishOptions,
    ) -> Result<String, QueueError>;

    /// Start a consumer delivering jobs from `queue` to `handler`, one at a
    /// time in FIFO order.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<ConsumerHandle, QueueError>;

    /// Acknowledge successful processing of an active job.
    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Record a failure.
    ///
    /// With `retry` and remaining budget, a successor job is minted and
    /// re-enqueued after the backoff delay; its id is returned.  Otherwise
    /// the job is dead-lettered and `None` is returned.
    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<Option<String>, QueueError>;
}

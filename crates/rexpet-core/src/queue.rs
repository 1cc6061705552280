//! Generation Job Queue
//!
//! At-least-once delivery with a visibility timeout. A dequeued job is leased
//! until `locked_until`; a lease that expires without `ack` is abandoned work
//! and is moved to the dead-letter set by [`JobQueue::reap_expired`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Leased,
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "leased" => Ok(JobStatus::Leased),
            "dead_lettered" => Ok(JobStatus::DeadLettered),
            other => Err(CoreError::InvalidArgument(format!("unknown job status: {other}"))),
        }
    }
}

/// A unit of queued work referencing one generation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub generation_id: Uuid,
    pub status: JobStatus,

    /// Number of times the job was leased
    pub attempts: u32,

    pub enqueued_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Work queue contract
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, generation_id: Uuid) -> Result<Job>;

    /// Lease the oldest pending job for `visibility`
    async fn dequeue(&self, visibility: Duration) -> Result<Option<Job>>;

    /// Settle a leased job and drop it; fails with `Conflict` if the lease was lost
    async fn ack(&self, job_id: Uuid) -> Result<()>;

    /// Dead-letter every lease that expired before `now` and return those jobs
    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn dead_letters(&self) -> Result<Vec<Job>>;

    /// Number of jobs waiting to be leased
    async fn depth(&self) -> Result<usize>;
}

/// Dead letters retained by [`MemoryJobQueue`] before the oldest are dropped
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 1000;

#[derive(Default)]
struct QueueState {
    order: VecDeque<Uuid>,
    dead: VecDeque<Uuid>,
    jobs: HashMap<Uuid, Job>,
}

/// In-memory job queue (for development and tests)
///
/// Acked jobs are dropped immediately; dead letters are kept up to a limit.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    dead_letter_limit: usize,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::with_dead_letter_limit(DEFAULT_DEAD_LETTER_LIMIT)
    }

    pub fn with_dead_letter_limit(dead_letter_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            dead_letter_limit,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::Persistence("queue lock poisoned".into()))
    }

    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.lock().ok()?.jobs.get(&job_id).cloned()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, generation_id: Uuid) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            generation_id,
            status: JobStatus::Pending,
            attempts: 0,
            enqueued_at: Utc::now(),
            locked_until: None,
        };

        let mut state = self.lock()?;
        state.order.push_back(job.id);
        state.jobs.insert(job.id, job.clone());

        tracing::debug!(job_id = %job.id, generation_id = %generation_id, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self, visibility: Duration) -> Result<Option<Job>> {
        let visibility = chrono::Duration::from_std(visibility)
            .map_err(|e| CoreError::InvalidArgument(format!("visibility timeout: {e}")))?;

        let mut state = self.lock()?;
        while let Some(id) = state.order.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            job.status = JobStatus::Leased;
            job.attempts += 1;
            job.locked_until = Some(Utc::now() + visibility);
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::not_found("Job", job_id))?;

        if job.status != JobStatus::Leased {
            return Err(CoreError::Conflict(format!(
                "job {job_id} is no longer leased"
            )));
        }
        state.jobs.remove(&job_id);
        Ok(())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut state = self.lock()?;
        let mut expired = Vec::new();

        for job in state.jobs.values_mut() {
            let lapsed = job.status == JobStatus::Leased
                && job.locked_until.is_some_and(|until| until <= now);
            if lapsed {
                job.status = JobStatus::DeadLettered;
                expired.push(job.clone());
            }
        }

        expired.sort_by_key(|job| job.enqueued_at);
        for job in &expired {
            state.dead.push_back(job.id);
        }
        while state.dead.len() > self.dead_letter_limit {
            if let Some(oldest) = state.dead.pop_front() {
                state.jobs.remove(&oldest);
            }
        }

        if !expired.is_empty() {
            tracing::warn!(count = expired.len(), "Dead-lettered expired job leases");
        }
        Ok(expired)
    }

    async fn dead_letters(&self) -> Result<Vec<Job>> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::DeadLettered)
            .cloned()
            .collect())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count())
    }
}

//! SQLite Job Queue
//!
//! Same lease semantics as the in-memory queue, backed by the `jobs` table.
//! Dequeue selects the oldest pending row and stamps `locked_until` inside
//! one IMMEDIATE transaction, so two workers never lease the same job.
//! Acked rows are deleted; dead letters are trimmed to a fixed count.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rexpet_core::{CoreError, DEFAULT_DEAD_LETTER_LIMIT, Job, JobQueue, JobStatus, Result};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::database::call;
use crate::row::{self, JOB_COLUMNS, ts};

/// Durable [`JobQueue`] over one SQLite database
#[derive(Clone)]
pub struct SqliteJobQueue {
    conn: Connection,
    dead_letter_limit: usize,
}

impl SqliteJobQueue {
    pub fn new(conn: Connection) -> Self {
        Self::with_dead_letter_limit(conn, DEFAULT_DEAD_LETTER_LIMIT)
    }

    pub fn with_dead_letter_limit(conn: Connection, dead_letter_limit: usize) -> Self {
        Self {
            conn,
            dead_letter_limit,
        }
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Option<Job>> {
        call(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                    params![job_id.to_string()],
                    row::job,
                )
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, generation_id: Uuid) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            generation_id,
            status: JobStatus::Pending,
            attempts: 0,
            enqueued_at: Utc::now(),
            locked_until: None,
        };

        let job = call(&self.conn, move |conn| {
            conn.execute(
                &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, NULL)"),
                params![
                    job.id.to_string(),
                    job.generation_id.to_string(),
                    job.status.as_str(),
                    job.attempts,
                    ts(&job.enqueued_at),
                ],
            )?;
            Ok(job)
        })
        .await?;

        tracing::debug!(job_id = %job.id, generation_id = %generation_id, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self, visibility: Duration) -> Result<Option<Job>> {
        let visibility = chrono::Duration::from_std(visibility)
            .map_err(|e| CoreError::InvalidArgument(format!("visibility timeout: {e}")))?;

        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let next = tx
                .query_row(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' \
                         ORDER BY seq LIMIT 1"
                    ),
                    [],
                    row::job,
                )
                .optional()?;
            let Some(mut job) = next else {
                return Ok(None);
            };

            let locked_until = Utc::now() + visibility;
            tx.execute(
                "UPDATE jobs SET status = 'leased', attempts = attempts + 1, locked_until = ?2 \
                 WHERE id = ?1",
                params![job.id.to_string(), ts(&locked_until)],
            )?;
            tx.commit()?;

            job.status = JobStatus::Leased;
            job.attempts += 1;
            job.locked_until = Some(locked_until);
            Ok(Some(job))
        })
        .await
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let status = tx
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?1",
                    params![job_id.to_string()],
                    |r| row::parsed_at::<JobStatus>(r, 0),
                )
                .optional()?
                .ok_or_else(|| CoreError::not_found("Job", job_id))?;

            if status != JobStatus::Leased {
                return Err(CoreError::Conflict(format!("job {job_id} is no longer leased")).into());
            }
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let keep = i64::try_from(self.dead_letter_limit).unwrap_or(i64::MAX);

        let expired = call(&self.conn, move |conn| {
            let cutoff = ts(&now);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut expired = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE status = 'leased' AND locked_until <= ?1 ORDER BY seq"
                ))?;
                stmt.query_map(params![cutoff], row::job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            tx.execute(
                "UPDATE jobs SET status = 'dead_lettered' \
                 WHERE status = 'leased' AND locked_until <= ?1",
                params![cutoff],
            )?;
            tx.execute(
                "DELETE FROM jobs WHERE status = 'dead_lettered' AND seq NOT IN \
                 (SELECT seq FROM jobs WHERE status = 'dead_lettered' ORDER BY seq DESC LIMIT ?1)",
                params![keep],
            )?;
            tx.commit()?;

            for job in &mut expired {
                job.status = JobStatus::DeadLettered;
            }
            Ok(expired)
        })
        .await?;

        if !expired.is_empty() {
            tracing::warn!(count = expired.len(), "Dead-lettered expired job leases");
        }
        Ok(expired)
    }

    async fn dead_letters(&self) -> Result<Vec<Job>> {
        call(&self.conn, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'dead_lettered' ORDER BY seq"
            ))?;
            let jobs = stmt
                .query_map([], row::job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
        .await
    }

    async fn depth(&self) -> Result<usize> {
        let count: i64 = call(&self.conn, |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = 'pending'",
                [],
                |r| r.get(0),
            )?)
        })
        .await?;

        usize::try_from(count).map_err(|e| CoreError::Persistence(e.to_string()))
    }
}

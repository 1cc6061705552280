//! Reaper
//!
//! Periodic sweep that settles work nobody will finish: expired job leases
//! and generations left non-terminal past the stale threshold. Both are
//! failed and refunded; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rexpet_core::{Auditor, CoreError, JobQueue, Result, Store};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::failure::fail_generation;

const LEASE_EXPIRED: &str = "Generation timed out: worker did not finish";
const STALLED: &str = "Generation stalled and was cancelled";

/// What one sweep did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dead_lettered: usize,
    pub refunded: usize,

    /// Generations that could not be settled this pass
    pub errors: usize,
}

pub struct Reaper {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    auditor: Auditor,
    stale_after: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, config: &StudioConfig) -> Self {
        Self {
            auditor: Auditor::new(store.clone()),
            store,
            queue,
            stale_after: config.stale_after,
            interval: config.reaper_interval,
        }
    }

    /// One pass as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for job in self.queue.reap_expired(now).await? {
            report.dead_lettered += 1;
            self.settle(job.generation_id, LEASE_EXPIRED, &mut report).await;
        }

        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| CoreError::InvalidArgument(format!("stale threshold: {e}")))?;
        for generation in self.store.stale_generations(now - stale_after).await? {
            self.settle(generation.id, STALLED, &mut report).await;
        }

        if report != SweepReport::default() {
            tracing::info!(
                dead_lettered = report.dead_lettered,
                refunded = report.refunded,
                errors = report.errors,
                "Reaper sweep"
            );
        }
        Ok(report)
    }

    /// A failure here leaves the generation for the next pass
    async fn settle(&self, generation_id: Uuid, reason: &str, report: &mut SweepReport) {
        match fail_generation(&self.store, &self.auditor, generation_id, reason, "reaper").await {
            Ok(Some(_)) => report.refunded += 1,
            Ok(None) => {}
            // Job outlived its record
            Err(CoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::warn!(generation_id = %generation_id, error = %e, "Reaper could not settle generation");
                report.errors += 1;
            }
        }
    }

    /// Sweep every interval until `shutdown` flips to `true` or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Reaper sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use rexpet_core::{GenerationStatus, TransactionKind};

    use super::*;
    use crate::service::GenerationRequest;
    use crate::testkit::{Fixture, RefundRejectingStore};

    async fn requested(fx: &Fixture) -> (Uuid, Uuid) {
        let user = fx.funded_user(1).await;
        let original = fx.original(user).await;
        let style = fx.style().await;
        let ticket = fx
            .service()
            .request_generation(
                user,
                GenerationRequest {
                    original_id: original.id,
                    style_id: style.id,
                    custom_prompt: None,
                },
                None,
            )
            .await
            .unwrap();
        (user, ticket.generation_id)
    }

    fn refunds(entries: &[rexpet_core::LedgerEntry]) -> usize {
        entries
            .iter()
            .filter(|e| e.kind == TransactionKind::Refund)
            .count()
    }

    #[tokio::test]
    async fn test_expired_lease_refunded_exactly_once() {
        let fx = Fixture::new();
        let (user, generation_id) = requested(&fx).await;
        let config = StudioConfig::default();

        // Worker leased the job, marked it processing and died
        fx.queue.dequeue(config.job_visibility).await.unwrap().unwrap();
        fx.store.mark_processing(generation_id).await.unwrap();

        let reaper = fx.reaper(&config);
        let later = Utc::now() + chrono::Duration::seconds(301);
        let report = reaper.sweep(later).await.unwrap();
        assert_eq!(report, SweepReport { dead_lettered: 1, refunded: 1, errors: 0 });

        let again = reaper.sweep(later + chrono::Duration::hours(2)).await.unwrap();
        assert_eq!(again, SweepReport::default());

        let generation = fx.store.generation(generation_id).await.unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Failed);
        assert_eq!(generation.error_message.as_deref(), Some(LEASE_EXPIRED));
        assert_eq!(fx.balance(user).await, 1);
        assert_eq!(refunds(&fx.store.ledger(user).await.unwrap()), 1);
        assert_eq!(fx.queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_live_lease_left_alone() {
        let fx = Fixture::new();
        let (user, generation_id) = requested(&fx).await;
        let config = StudioConfig::default();
        fx.queue.dequeue(config.job_visibility).await.unwrap().unwrap();

        let report = fx.reaper(&config).sweep(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let generation = fx.store.generation(generation_id).await.unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Pending);
        assert_eq!(fx.balance(user).await, 0);
    }

    #[tokio::test]
    async fn test_stale_pending_without_job_refunded() {
        let fx = Fixture::new();
        let (user, generation_id) = requested(&fx).await;
        let config = StudioConfig::default();

        // Job never leased: only the stale threshold can catch it
        let later = Utc::now() + chrono::Duration::seconds(1801);
        let report = fx.reaper(&config).sweep(later).await.unwrap();
        assert_eq!(report, SweepReport { dead_lettered: 0, refunded: 1, errors: 0 });

        let generation = fx.store.generation(generation_id).await.unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Failed);
        assert_eq!(generation.error_message.as_deref(), Some(STALLED));
        assert_eq!(fx.balance(user).await, 1);
    }

    #[tokio::test]
    async fn test_settle_error_does_not_abort_sweep() {
        let fx = Fixture::new();
        let (_, stuck) = requested(&fx).await;
        let (user, lost) = requested(&fx).await;
        let config = StudioConfig::default();

        let store = Arc::new(RefundRejectingStore {
            inner: fx.store.clone(),
            rejected: stuck,
        });
        let reaper = Reaper::new(store, fx.queue.clone(), &config);

        let later = Utc::now() + chrono::Duration::seconds(1801);
        let report = reaper.sweep(later).await.unwrap();
        assert_eq!(report, SweepReport { dead_lettered: 0, refunded: 1, errors: 1 });

        // The healthy record was still settled
        let generation = fx.store.generation(lost).await.unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Failed);
        assert_eq!(fx.balance(user).await, 1);

        let generation = fx.store.generation(stuck).await.unwrap().unwrap();
        assert_eq!(generation.status, GenerationStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = Fixture::new();
        let config = StudioConfig {
            reaper_interval: Duration::from_millis(10),
            ..StudioConfig::default()
        };
        let reaper = fx.reaper(&config);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { reaper.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

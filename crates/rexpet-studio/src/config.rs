//! Pipeline configuration

use std::time::Duration;

/// Timeouts and sizing for the worker pool and reaper
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudioConfig {
    /// Upper bound on one generator call
    pub generation_timeout: Duration,

    /// Lease length for a dequeued job
    pub job_visibility: Duration,

    pub worker_concurrency: usize,

    /// Idle sleep between empty dequeues
    pub poll_interval: Duration,

    pub reaper_interval: Duration,

    /// Age after which a non-terminal generation is considered lost
    pub stale_after: Duration,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
            job_visibility: Duration::from_secs(300),
            worker_concurrency: 2,
            poll_interval: Duration::from_millis(500),
            reaper_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(1800),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            generation_timeout: env_secs("GENERATION_TIMEOUT_SECS")
                .unwrap_or(defaults.generation_timeout),
            job_visibility: env_secs("JOB_VISIBILITY_SECS").unwrap_or(defaults.job_visibility),
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_concurrency),
            reaper_interval: env_secs("REAPER_INTERVAL_SECS").unwrap_or(defaults.reaper_interval),
            stale_after: env_secs("STALE_GENERATION_SECS").unwrap_or(defaults.stale_after),
            ..defaults
        }
        .normalized()
    }

    /// Keep the generator deadline inside the job lease.
    ///
    /// A timeout at or past the visibility window lets the reaper refund a
    /// job that is still running, so it is cut to half the window.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.generation_timeout >= self.job_visibility {
            let clamped = self.job_visibility / 2;
            tracing::warn!(
                generation_timeout_secs = self.generation_timeout.as_secs_f64(),
                job_visibility_secs = self.job_visibility.as_secs_f64(),
                clamped_secs = clamped.as_secs_f64(),
                "⚠ GENERATION_TIMEOUT_SECS must be below JOB_VISIBILITY_SECS - clamping"
            );
            self.generation_timeout = clamped;
        }
        self
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

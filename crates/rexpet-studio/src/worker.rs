//! Generation Worker
//!
//! Drives one generation through `pending → processing → completed | failed`.
//!
//! ```text
//!  dequeue ─▶ mark processing ─▶ fetch original ─▶ render prompt
//!                                                        │
//!            ┌───────────── any error ◀──────────── generate (timeout)
//!            ▼                                           │
//!    fail + refund (+1)                       store result (no overwrite)
//!                                                        │
//!                                             mark completed ─▶ ack
//! ```
//!
//! Jobs are acknowledged only when processing reached a settled outcome. An
//! unacknowledged lease expires and the reaper fails and refunds the record.

use std::sync::Arc;

use rexpet_core::{
    AuditEventType, Auditor, Bucket, CoreError, Generation, GenerationInput, GenerationStatus,
    GenerationView, ImageGenerator, JobQueue, ObjectStorage, Result, Store,
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::failure::fail_generation;

const RESULT_CONTENT_TYPE: &str = "image/png";

pub struct GenerationWorker {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    generator: Arc<dyn ImageGenerator>,
    queue: Arc<dyn JobQueue>,
    auditor: Auditor,
    config: StudioConfig,
}

impl GenerationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        generator: Arc<dyn ImageGenerator>,
        queue: Arc<dyn JobQueue>,
        config: StudioConfig,
    ) -> Self {
        Self {
            auditor: Auditor::new(store.clone()),
            store,
            storage,
            generator,
            queue,
            config,
        }
    }

    /// Lease and process one job; `None` when the queue is empty
    pub async fn process_next(&self) -> Result<Option<GenerationView>> {
        let Some(job) = self.queue.dequeue(self.config.job_visibility).await? else {
            return Ok(None);
        };

        tracing::debug!(job_id = %job.id, generation_id = %job.generation_id, attempt = job.attempts, "Job leased");
        let view = self.process(job.generation_id).await?;

        if let Err(e) = self.queue.ack(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Ack rejected; lease was lost");
        }
        Ok(Some(view))
    }

    /// Run one generation to a terminal state.
    ///
    /// Returns the record as it stands afterwards. A terminal record is left
    /// untouched; a record already `processing` belongs to an abandoned
    /// attempt and is failed and refunded rather than re-run.
    pub async fn process(&self, generation_id: Uuid) -> Result<GenerationView> {
        let generation = self
            .store
            .generation(generation_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Generation", generation_id))?;

        match generation.status {
            GenerationStatus::Completed | GenerationStatus::Failed => {
                tracing::debug!(generation_id = %generation_id, status = %generation.status, "Generation already settled");
                return Ok(generation.view());
            }
            GenerationStatus::Processing => {
                return self
                    .fail(generation_id, "Generation interrupted before completion")
                    .await;
            }
            GenerationStatus::Pending => {}
        }

        let generation = match self.store.mark_processing(generation_id).await {
            Ok(generation) => generation,
            Err(CoreError::Conflict(_)) => return self.current(generation_id).await,
            Err(e) => return Err(e),
        };

        tracing::info!(generation_id = %generation_id, user_id = %generation.user_id, "Generation started");

        let result_path = match self.render(&generation).await {
            Ok(path) => path,
            Err(e) => return self.fail(generation_id, &e.to_string()).await,
        };

        match self
            .store
            .mark_completed(generation_id, result_path.clone())
            .await
        {
            Ok(completed) => {
                tracing::info!(generation_id = %generation_id, path = %result_path, "Generation completed");
                self.auditor
                    .record(
                        AuditEventType::GenerationCompleted,
                        Some(completed.user_id),
                        serde_json::json!({
                            "generation_id": generation_id,
                            "storage_path": result_path,
                        }),
                        None,
                    )
                    .await;
                Ok(completed.view())
            }
            Err(CoreError::Conflict(reason)) => {
                // Settled elsewhere (reaper) while the generator ran
                tracing::warn!(generation_id = %generation_id, reason = %reason, "Late completion discarded");
                self.discard_result(&result_path).await;
                self.current(generation_id).await
            }
            Err(e) => {
                self.discard_result(&result_path).await;
                self.fail(generation_id, &e.to_string()).await
            }
        }
    }

    /// Steps between `processing` and `completed`; returns the stored path
    async fn render(&self, generation: &Generation) -> Result<String> {
        let original = self
            .store
            .source_image(generation.original_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Original image", generation.original_id))?;

        let image = self
            .storage
            .download(Bucket::Originals, &original.storage_path)
            .await?;

        let style = self
            .store
            .style(generation.style_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Style", generation.style_id))?;

        let prompt = generation
            .custom_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(style.prompt_template);

        let input = GenerationInput {
            image,
            mime_type: original.mime_type,
            prompt,
        };

        let timeout = self.config.generation_timeout;
        let generated = tokio::time::timeout(timeout, self.generator.generate(&input))
            .await
            .map_err(|_| {
                CoreError::Upstream(format!(
                    "Generation timed out after {}s",
                    timeout.as_secs_f32()
                ))
            })??;

        if generated.bytes.is_empty() {
            return Err(CoreError::Upstream("Generator returned an empty image".into()));
        }

        let path = generation.result_path();
        self.storage
            .upload(Bucket::Generated, &path, &generated.bytes, RESULT_CONTENT_TYPE)
            .await?;

        Ok(path)
    }

    async fn fail(&self, generation_id: Uuid, message: &str) -> Result<GenerationView> {
        fail_generation(&self.store, &self.auditor, generation_id, message, "worker").await?;
        self.current(generation_id).await
    }

    async fn discard_result(&self, path: &str) {
        if let Err(e) = self.storage.delete(Bucket::Generated, path).await {
            tracing::warn!(path = %path, error = %e, "Failed to delete discarded result");
        }
    }

    async fn current(&self, generation_id: Uuid) -> Result<GenerationView> {
        self.store
            .generation(generation_id)
            .await?
            .map(|g| g.view())
            .ok_or_else(|| CoreError::not_found("Generation", generation_id))
    }

    /// Poll the queue until `shutdown` flips to `true` or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(generator = %self.generator.info().name, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Worker iteration failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
    }
}

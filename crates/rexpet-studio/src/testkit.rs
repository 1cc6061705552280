//! Shared in-memory wiring for the pipeline tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rexpet_core::{
    Account, AuditEvent, Bucket, CoreError, CreditMutation, Generation, GenerationDraft,
    ImageGenerator, LedgerEntry, MemoryJobQueue, MemoryObjectStorage, MemoryStore, ObjectStorage,
    Refund, Reservation, Result, SourceImage, Store, Style,
};
use uuid::Uuid;

use crate::config::StudioConfig;
use crate::reaper::Reaper;
use crate::service::GenerationService;
use crate::worker::GenerationWorker;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub queue: Arc<MemoryJobQueue>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            storage: Arc::new(MemoryObjectStorage::new()),
            queue: Arc::new(MemoryJobQueue::new()),
        }
    }

    pub fn service(&self) -> GenerationService {
        GenerationService::new(self.store.clone(), self.storage.clone(), self.queue.clone())
    }

    pub fn worker(
        &self,
        generator: Arc<dyn ImageGenerator>,
        config: StudioConfig,
    ) -> GenerationWorker {
        GenerationWorker::new(
            self.store.clone(),
            self.storage.clone(),
            generator,
            self.queue.clone(),
            config,
        )
    }

    pub fn reaper(&self, config: &StudioConfig) -> Reaper {
        Reaper::new(self.store.clone(), self.queue.clone(), config)
    }

    /// A user holding `credits` from one purchase
    pub async fn funded_user(&self, credits: i64) -> Uuid {
        let user = Uuid::new_v4();
        self.store
            .apply_credit(CreditMutation::purchase(
                user,
                credits,
                &format!("cs_{user}"),
                "bundle",
            ))
            .await
            .unwrap();
        user
    }

    pub async fn original(&self, user: Uuid) -> SourceImage {
        let image = SourceImage::new(user, "rex.jpg", 4, "image/jpeg");
        self.storage
            .upload(Bucket::Originals, &image.storage_path, &[0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
            .await
            .unwrap();
        self.store.insert_source_image(image).await.unwrap()
    }

    pub async fn style(&self) -> Style {
        self.store
            .upsert_style(Style::new("Renaissance", "Paint this pet as a Renaissance noble"))
            .await
            .unwrap()
    }

    pub async fn balance(&self, user: Uuid) -> i64 {
        self.store
            .account(user)
            .await
            .unwrap()
            .map_or(0, |a| a.credit_balance)
    }
}

/// Memory store whose refunds fail for one generation
pub(crate) struct RefundRejectingStore {
    pub inner: Arc<MemoryStore>,
    pub rejected: Uuid,
}

#[async_trait]
impl Store for RefundRejectingStore {
    async fn ensure_account(&self, user_id: Uuid) -> Result<Account> {
        self.inner.ensure_account(user_id).await
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>> {
        self.inner.account(user_id).await
    }

    async fn set_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<String>,
    ) -> Result<Account> {
        self.inner.set_display_name(user_id, display_name).await
    }

    async fn apply_credit(&self, mutation: CreditMutation) -> Result<LedgerEntry> {
        self.inner.apply_credit(mutation).await
    }

    async fn entry_for_session(&self, session_id: &str) -> Result<Option<LedgerEntry>> {
        self.inner.entry_for_session(session_id).await
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger(user_id).await
    }

    async fn insert_source_image(&self, image: SourceImage) -> Result<SourceImage> {
        self.inner.insert_source_image(image).await
    }

    async fn source_image(&self, id: Uuid) -> Result<Option<SourceImage>> {
        self.inner.source_image(id).await
    }

    async fn upsert_style(&self, style: Style) -> Result<Style> {
        self.inner.upsert_style(style).await
    }

    async fn style(&self, id: Uuid) -> Result<Option<Style>> {
        self.inner.style(id).await
    }

    async fn styles(&self) -> Result<Vec<Style>> {
        self.inner.styles().await
    }

    async fn reserve_generation(&self, draft: GenerationDraft) -> Result<Reservation> {
        self.inner.reserve_generation(draft).await
    }

    async fn generation(&self, id: Uuid) -> Result<Option<Generation>> {
        self.inner.generation(id).await
    }

    async fn generations_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Generation>> {
        self.inner.generations_for_user(user_id, page, page_size).await
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Generation> {
        self.inner.mark_processing(id).await
    }

    async fn mark_completed(&self, id: Uuid, storage_path: String) -> Result<Generation> {
        self.inner.mark_completed(id, storage_path).await
    }

    async fn fail_and_refund(&self, id: Uuid, error_message: String) -> Result<Refund> {
        if id == self.rejected {
            return Err(CoreError::Persistence("database is locked".into()));
        }
        self.inner.fail_and_refund(id, error_message).await
    }

    async fn stale_generations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Generation>> {
        self.inner.stale_generations(cutoff).await
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<()> {
        self.inner.append_audit(event).await
    }
}

//! Generation Request Handling
//!
//! Validates a request, reserves one credit together with the `pending`
//! record, and hands the work to the queue. Also serves the read side the
//! dashboard polls: status, balance and history.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rexpet_core::{
    AuditEventType, Auditor, Bucket, CoreError, GenerationDraft, GenerationStatus,
    GenerationView, JobQueue, LedgerEntry, ObjectStorage, Result, SourceImage, Store,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::fail_generation;

/// Largest accepted original upload
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const ACCEPTED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Gallery page size
pub const HISTORY_PAGE_SIZE: usize = 12;

/// A portrait request
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GenerationRequest {
    pub original_id: Uuid,
    pub style_id: Uuid,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

/// Returned as soon as the job is queued
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerationTicket {
    pub generation_id: Uuid,
    pub status: GenerationStatus,
}

/// Balance plus one page of history, newest first
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreditSummary {
    pub balance: i64,
    pub transactions: Vec<LedgerEntry>,
    pub page: usize,
    pub page_size: usize,
}

/// One gallery row: the generation plus the style it was rendered in
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub status: GenerationStatus,
    pub style_id: Uuid,

    /// `None` once the style has been removed from the catalog
    pub style_name: Option<String>,
    pub preview_url: Option<String>,

    pub storage_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerationHistory {
    pub generations: Vec<HistoryItem>,
    pub page: usize,
    pub page_size: usize,
}

pub struct GenerationService {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn JobQueue>,
    auditor: Auditor,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            auditor: Auditor::new(store.clone()),
            store,
            storage,
            queue,
        }
    }

    /// Reserve a credit and dispatch a generation.
    ///
    /// Nothing is written unless the image is the caller's, the style is
    /// usable and the balance covers one credit.
    pub async fn request_generation(
        &self,
        user_id: Uuid,
        request: GenerationRequest,
        ip: Option<IpAddr>,
    ) -> Result<GenerationTicket> {
        let original = self
            .store
            .source_image(request.original_id)
            .await?
            .filter(|image| image.user_id == user_id)
            .ok_or_else(|| CoreError::not_found("Original image", request.original_id))?;

        let style = self
            .store
            .style(request.style_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Style", request.style_id))?;
        if !style.is_active {
            return Err(CoreError::InvalidArgument(format!(
                "Style {} is not available",
                style.name
            )));
        }

        let custom_prompt = request
            .custom_prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let reservation = self
            .store
            .reserve_generation(GenerationDraft {
                user_id,
                original_id: original.id,
                style_id: style.id,
                custom_prompt,
            })
            .await?;
        let generation_id = reservation.generation.id;

        tracing::info!(
            generation_id = %generation_id,
            user_id = %user_id,
            style = %style.name,
            balance_after = reservation.entry.balance_after,
            "Credit reserved"
        );

        self.auditor
            .record(
                AuditEventType::GenerationRequested,
                Some(user_id),
                serde_json::json!({
                    "generation_id": generation_id,
                    "style_id": style.id,
                    "original_id": original.id,
                }),
                ip,
            )
            .await;

        if let Err(e) = self.queue.enqueue(generation_id).await {
            tracing::error!(generation_id = %generation_id, error = %e, "Dispatch failed");
            fail_generation(
                &self.store,
                &self.auditor,
                generation_id,
                "Failed to dispatch generation",
                "dispatch",
            )
            .await?;
            return Err(e);
        }

        Ok(GenerationTicket {
            generation_id,
            status: reservation.generation.status,
        })
    }

    /// Owner-scoped status poll; someone else's record is `NotFound`
    pub async fn status(&self, user_id: Uuid, generation_id: Uuid) -> Result<GenerationView> {
        self.store
            .generation(generation_id)
            .await?
            .filter(|g| g.user_id == user_id)
            .map(|g| g.view())
            .ok_or_else(|| CoreError::not_found("Generation", generation_id))
    }

    /// The caller's generations, newest first, one zero-based page at a time
    pub async fn history(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<GenerationHistory> {
        let page_size = page_size
            .unwrap_or(HISTORY_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let rows = self
            .store
            .generations_for_user(user_id, page, page_size)
            .await?;

        let styles: HashMap<Uuid, _> = self
            .store
            .styles()
            .await?
            .into_iter()
            .map(|style| (style.id, style))
            .collect();

        let generations = rows
            .into_iter()
            .map(|g| {
                let style = styles.get(&g.style_id);
                HistoryItem {
                    id: g.id,
                    status: g.status,
                    style_id: g.style_id,
                    style_name: style.map(|s| s.name.clone()),
                    preview_url: style.and_then(|s| s.preview_url.clone()),
                    storage_path: g.storage_path,
                    error_message: g.error_message,
                    created_at: g.created_at,
                    completed_at: g.completed_at,
                }
            })
            .collect();

        Ok(GenerationHistory {
            generations,
            page,
            page_size,
        })
    }

    /// Store an original image and record it
    pub async fn upload_original(
        &self,
        user_id: Uuid,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<SourceImage> {
        if bytes.is_empty() {
            return Err(CoreError::InvalidArgument("Empty upload".into()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(CoreError::InvalidArgument(
                "File size must be under 10MB".into(),
            ));
        }
        if !ACCEPTED_IMAGE_TYPES.contains(&mime_type) {
            return Err(CoreError::InvalidArgument(format!(
                "Unsupported image type: {mime_type}"
            )));
        }

        let file_size = i64::try_from(bytes.len())
            .map_err(|_| CoreError::InvalidArgument("Upload too large".into()))?;
        let image = SourceImage::new(user_id, file_name, file_size, mime_type);

        self.storage
            .upload(Bucket::Originals, &image.storage_path, bytes, mime_type)
            .await?;

        match self.store.insert_source_image(image.clone()).await {
            Ok(image) => {
                tracing::info!(
                    original_id = %image.id,
                    user_id = %user_id,
                    size = image.file_size,
                    "Original uploaded"
                );
                Ok(image)
            }
            Err(e) => {
                if let Err(cleanup) = self
                    .storage
                    .delete(Bucket::Originals, &image.storage_path)
                    .await
                {
                    tracing::warn!(path = %image.storage_path, error = %cleanup, "Orphaned upload");
                }
                Err(e)
            }
        }
    }

    /// Balance and one zero-based page of ledger entries, newest first
    pub async fn credits(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<CreditSummary> {
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let balance = self
            .store
            .account(user_id)
            .await?
            .map_or(0, |a| a.credit_balance);

        let mut entries = self.store.ledger(user_id).await?;
        entries.reverse();
        let transactions = entries
            .into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(CreditSummary {
            balance,
            transactions,
            page,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rexpet_core::{
        Job, JobQueue, MemoryJobQueue, MemoryObjectStorage, MemoryStore, Style, TransactionKind,
    };

    use super::*;
    use crate::testkit::Fixture;

    #[tokio::test]
    async fn test_request_reserves_and_enqueues() {
        let fx = Fixture::new();
        let user = fx.funded_user(3).await;
        let original = fx.original(user).await;
        let style = fx.style().await;

        let ticket = fx
            .service()
            .request_generation(
                user,
                GenerationRequest {
                    original_id: original.id,
                    style_id: style.id,
                    custom_prompt: Some("  ".into()),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(ticket.status, GenerationStatus::Pending);
        assert_eq!(fx.balance(user).await, 2);
        assert_eq!(fx.queue.depth().await.unwrap(), 1);

        let generation = fx.store.generation(ticket.generation_id).await.unwrap().unwrap();
        assert_eq!(generation.custom_prompt, None);

        let requested = fx
            .store
            .audit_events()
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::GenerationRequested)
            .count();
        assert_eq!(requested, 1);
    }

    #[tokio::test]
    async fn test_insufficient_credits_writes_nothing() {
        let fx = Fixture::new();
        let user = Uuid::new_v4();
        let original = fx.original(user).await;
        let style = fx.style().await;

        let err = fx
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
            .unwrap_err();

        assert_eq!(err, CoreError::InsufficientCredits { balance: 0 });
        assert!(fx.store.generations().unwrap().is_empty());
        assert!(fx.store.ledger(user).await.unwrap().is_empty());
        assert_eq!(fx.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_foreign_original_and_missing_style() {
        let fx = Fixture::new();
        let user = fx.funded_user(2).await;
        let stranger_original = fx.original(Uuid::new_v4()).await;
        let style = fx.style().await;
        let service = fx.service();

        let err = service
            .request_generation(
                user,
                GenerationRequest {
                    original_id: stranger_original.id,
                    style_id: style.id,
                    custom_prompt: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Original image", .. }));

        let own = fx.original(user).await;
        let err = service
            .request_generation(
                user,
                GenerationRequest {
                    original_id: own.id,
                    style_id: Uuid::new_v4(),
                    custom_prompt: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Style", .. }));

        assert_eq!(fx.balance(user).await, 2);
    }

    #[tokio::test]
    async fn test_inactive_style_rejected() {
        let fx = Fixture::new();
        let user = fx.funded_user(1).await;
        let original = fx.original(user).await;
        let mut retired = Style::new("Cubist", "cubist portrait");
        retired.is_active = false;
        let retired = fx.store.upsert_style(retired).await.unwrap();

        let err = fx
            .service()
            .request_generation(
                user,
                GenerationRequest {
                    original_id: original.id,
                    style_id: retired.id,
                    custom_prompt: None,
                },
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(fx.balance(user).await, 1);
    }

    /// Queue that rejects every enqueue
    struct BrokenQueue;

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn enqueue(&self, _generation_id: Uuid) -> Result<Job> {
            Err(CoreError::Persistence("queue unavailable".into()))
        }
        async fn dequeue(&self, _visibility: std::time::Duration) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn ack(&self, job_id: Uuid) -> Result<()> {
            Err(CoreError::not_found("Job", job_id))
        }
        async fn reap_expired(&self, _now: DateTime<Utc>) -> Result<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn dead_letters(&self) -> Result<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn depth(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_dispatch_failure_refunds() {
        let fx = Fixture::new();
        let user = fx.funded_user(1).await;
        let original = fx.original(user).await;
        let style = fx.style().await;
        let service = GenerationService::new(fx.store.clone(), fx.storage.clone(), Arc::new(BrokenQueue));

        let err = service
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
            .unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));

        assert_eq!(fx.balance(user).await, 1);
        let generations = fx.store.generations().unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].status, GenerationStatus::Failed);

        let kinds: Vec<_> = fx
            .store
            .ledger(user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.kind, e.amount))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TransactionKind::Purchase, 1),
                (TransactionKind::Deduction, -1),
                (TransactionKind::Refund, 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_is_owner_scoped() {
        let fx = Fixture::new();
        let user = fx.funded_user(1).await;
        let original = fx.original(user).await;
        let style = fx.style().await;
        let service = fx.service();

        let ticket = service
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

        let view = service.status(user, ticket.generation_id).await.unwrap();
        assert_eq!(view.status, GenerationStatus::Pending);
        assert_eq!(view.storage_path, None);

        let err = service
            .status(Uuid::new_v4(), ticket.generation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Generation", .. }));
    }

    #[tokio::test]
    async fn test_upload_original_validates_and_stores() {
        let fx = Fixture::new();
        let user = Uuid::new_v4();
        let service = fx.service();

        let image = service
            .upload_original(user, "Rex.PNG", "image/png", b"\x89PNG....")
            .await
            .unwrap();
        assert!(image.storage_path.starts_with(&format!("{user}/")));
        assert!(image.storage_path.ends_with(".png"));
        assert!(fx.storage.contains(Bucket::Originals, &image.storage_path));
        assert_eq!(fx.store.source_image(image.id).await.unwrap(), Some(image));

        let err = service
            .upload_original(user, "notes.txt", "text/plain", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));

        let err = service
            .upload_original(user, "empty.jpg", "image/jpeg", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));

        let huge = vec![0_u8; MAX_UPLOAD_BYTES + 1];
        let err = service
            .upload_original(user, "huge.jpg", "image/jpeg", &huge)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_history_newest_first_with_style() {
        let fx = Fixture::new();
        let user = fx.funded_user(14).await;
        let original = fx.original(user).await;
        let mut style = Style::new("Watercolor", "soft watercolor portrait");
        style.preview_url = Some("/styles/watercolor.webp".into());
        let style = fx.store.upsert_style(style).await.unwrap();
        let service = fx.service();

        let mut ids = Vec::new();
        for _ in 0..14 {
            let ticket = service
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
            ids.push(ticket.generation_id);
        }

        // Another user's work never shows up
        let stranger = fx.funded_user(1).await;
        let theirs = fx.original(stranger).await;
        service
            .request_generation(
                stranger,
                GenerationRequest {
                    original_id: theirs.id,
                    style_id: style.id,
                    custom_prompt: None,
                },
                None,
            )
            .await
            .unwrap();

        let first = service.history(user, 0, None).await.unwrap();
        assert_eq!(first.page_size, HISTORY_PAGE_SIZE);
        assert_eq!(first.generations.len(), 12);
        assert_eq!(first.generations[0].id, ids[13]);
        assert_eq!(first.generations[0].style_name.as_deref(), Some("Watercolor"));
        assert_eq!(
            first.generations[0].preview_url.as_deref(),
            Some("/styles/watercolor.webp")
        );

        let second = service.history(user, 1, None).await.unwrap();
        let tail: Vec<Uuid> = second.generations.iter().map(|g| g.id).collect();
        assert_eq!(tail, vec![ids[1], ids[0]]);

        let empty = service.history(Uuid::new_v4(), 0, Some(0)).await.unwrap();
        assert_eq!(empty.page_size, 1);
        assert!(empty.generations.is_empty());
    }

    #[tokio::test]
    async fn test_credits_paged_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let service = GenerationService::new(
            store.clone(),
            Arc::new(MemoryObjectStorage::new()),
            Arc::new(MemoryJobQueue::new()),
        );
        let user = Uuid::new_v4();
        for i in 0..25 {
            store
                .apply_credit(rexpet_core::CreditMutation::purchase(
                    user,
                    1,
                    &format!("cs_{i}"),
                    "starter",
                ))
                .await
                .unwrap();
        }

        let first = service.credits(user, 0, None).await.unwrap();
        assert_eq!(first.balance, 25);
        assert_eq!(first.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(first.transactions.len(), 20);
        assert_eq!(first.transactions[0].balance_after, 25);

        let second = service.credits(user, 1, None).await.unwrap();
        assert_eq!(second.transactions.len(), 5);
        assert_eq!(second.transactions[4].balance_after, 1);

        let empty = service.credits(Uuid::new_v4(), 0, Some(500)).await.unwrap();
        assert_eq!(empty.balance, 0);
        assert_eq!(empty.page_size, MAX_PAGE_SIZE);
        assert!(empty.transactions.is_empty());
    }
}

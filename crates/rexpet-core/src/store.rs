//! Record Store
//!
//! The `Store` trait is the contract the ledger and the generation pipeline
//! require from the relational backend. Every method is one atomic operation:
//! multi-row effects (balance + ledger entry, deduction + generation record,
//! failed transition + refund) either happen together or not at all.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::ledger::CreditMutation;
use crate::model::{
    Account, AuditEvent, Generation, GenerationDraft, GenerationStatus, LedgerEntry, SourceImage,
    Style,
};

/// Outcome of an atomic credit reservation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub generation: Generation,
    pub entry: LedgerEntry,
}

/// Outcome of an atomic fail-and-refund
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refund {
    pub generation: Generation,
    pub entry: LedgerEntry,
}

/// Persistence contract
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an account, creating it at balance zero if absent
    async fn ensure_account(&self, user_id: Uuid) -> Result<Account>;

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>>;

    /// Set or clear the profile display name, creating the account if absent
    async fn set_display_name(&self, user_id: Uuid, display_name: Option<String>)
    -> Result<Account>;

    /// Adjust the balance and append one ledger entry.
    ///
    /// Fails with `InsufficientCredits` if the result would be negative and
    /// with `Conflict` if the session reference or idempotency key is taken.
    async fn apply_credit(&self, mutation: CreditMutation) -> Result<LedgerEntry>;

    /// Ledger entry that references a payment session, if any
    async fn entry_for_session(&self, session_id: &str) -> Result<Option<LedgerEntry>>;

    /// All entries for a user in insertion order
    async fn ledger(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>>;

    async fn insert_source_image(&self, image: SourceImage) -> Result<SourceImage>;

    async fn source_image(&self, id: Uuid) -> Result<Option<SourceImage>>;

    async fn upsert_style(&self, style: Style) -> Result<Style>;

    async fn style(&self, id: Uuid) -> Result<Option<Style>>;

    async fn styles(&self) -> Result<Vec<Style>>;

    /// Deduct one credit and create a `pending` generation together
    async fn reserve_generation(&self, draft: GenerationDraft) -> Result<Reservation>;

    async fn generation(&self, id: Uuid) -> Result<Option<Generation>>;

    /// One zero-based page of a user's generations, newest first
    async fn generations_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Generation>>;

    /// `pending → processing`
    async fn mark_processing(&self, id: Uuid) -> Result<Generation>;

    /// `processing → completed`; the storage path must be non-empty
    async fn mark_completed(&self, id: Uuid, storage_path: String) -> Result<Generation>;

    /// Any non-terminal status `→ failed`, plus a +1 refund entry
    async fn fail_and_refund(&self, id: Uuid, error_message: String) -> Result<Refund>;

    /// Non-terminal generations untouched since `cutoff`
    async fn stale_generations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Generation>>;

    async fn append_audit(&self, event: AuditEvent) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    ledger: Vec<LedgerEntry>,
    session_refs: HashMap<String, Uuid>,
    idempotency_keys: HashMap<String, Uuid>,
    originals: HashMap<Uuid, SourceImage>,
    styles: HashMap<Uuid, Style>,
    generations: HashMap<Uuid, Generation>,
    generation_order: Vec<Uuid>,
    audit: Vec<AuditEvent>,
}

impl Tables {
    /// Single code path for every balance change
    fn apply(&mut self, mutation: CreditMutation) -> Result<LedgerEntry> {
        if let Some(session) = &mutation.stripe_session_id {
            if self.session_refs.contains_key(session) {
                return Err(CoreError::Conflict(format!(
                    "payment session {session} already recorded"
                )));
            }
        }
        if let Some(key) = &mutation.idempotency_key {
            if self.idempotency_keys.contains_key(key) {
                return Err(CoreError::Conflict(format!(
                    "idempotency key {key} already used"
                )));
            }
        }

        let balance = self
            .accounts
            .get(&mutation.user_id)
            .map_or(0, |a| a.credit_balance);
        let new_balance = balance.checked_add(mutation.amount).ok_or_else(|| {
            CoreError::InvalidArgument(format!(
                "credit amount {} overflows the balance",
                mutation.amount
            ))
        })?;
        if new_balance < 0 {
            return Err(CoreError::InsufficientCredits { balance });
        }

        let now = Utc::now();
        let account = self
            .accounts
            .entry(mutation.user_id)
            .or_insert_with(|| Account::new(mutation.user_id));
        account.credit_balance = new_balance;
        account.updated_at = now;

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: mutation.user_id,
            kind: mutation.kind,
            amount: mutation.amount,
            balance_after: new_balance,
            stripe_session_id: mutation.stripe_session_id,
            idempotency_key: mutation.idempotency_key,
            description: mutation.description,
            generation_id: mutation.generation_id,
            created_at: now,
        };

        if let Some(session) = &entry.stripe_session_id {
            self.session_refs.insert(session.clone(), entry.id);
        }
        if let Some(key) = &entry.idempotency_key {
            self.idempotency_keys.insert(key.clone(), entry.id);
        }
        self.ledger.push(entry.clone());

        Ok(entry)
    }

    fn generation_mut(&mut self, id: Uuid) -> Result<&mut Generation> {
        self.generations
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Generation", id))
    }
}

/// In-memory store (for development and tests)
///
/// One lock guards all tables, so each trait method is a serialized
/// transaction.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| CoreError::Persistence("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| CoreError::Persistence("store lock poisoned".into()))
    }

    /// Audit trail snapshot, for operators and tests
    pub fn audit_events(&self) -> Result<Vec<AuditEvent>> {
        Ok(self.read()?.audit.clone())
    }

    /// Every generation, in no particular order
    pub fn generations(&self) -> Result<Vec<Generation>> {
        Ok(self.read()?.generations.values().cloned().collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ensure_account(&self, user_id: Uuid) -> Result<Account> {
        let mut tables = self.write()?;
        Ok(tables
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id))
            .clone())
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&user_id).cloned())
    }

    async fn set_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<String>,
    ) -> Result<Account> {
        let mut tables = self.write()?;
        let account = tables
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::new(user_id));
        account.display_name = display_name;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn apply_credit(&self, mutation: CreditMutation) -> Result<LedgerEntry> {
        self.write()?.apply(mutation)
    }

    async fn entry_for_session(&self, session_id: &str) -> Result<Option<LedgerEntry>> {
        let tables = self.read()?;
        Ok(tables
            .session_refs
            .get(session_id)
            .and_then(|id| tables.ledger.iter().find(|e| e.id == *id))
            .cloned())
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .read()?
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_source_image(&self, image: SourceImage) -> Result<SourceImage> {
        let mut tables = self.write()?;
        if tables.originals.contains_key(&image.id) {
            return Err(CoreError::Conflict(format!(
                "source image {} already exists",
                image.id
            )));
        }
        tables.originals.insert(image.id, image.clone());
        Ok(image)
    }

    async fn source_image(&self, id: Uuid) -> Result<Option<SourceImage>> {
        Ok(self.read()?.originals.get(&id).cloned())
    }

    async fn upsert_style(&self, style: Style) -> Result<Style> {
        self.write()?.styles.insert(style.id, style.clone());
        Ok(style)
    }

    async fn style(&self, id: Uuid) -> Result<Option<Style>> {
        Ok(self.read()?.styles.get(&id).cloned())
    }

    async fn styles(&self) -> Result<Vec<Style>> {
        Ok(self.read()?.styles.values().cloned().collect())
    }

    async fn reserve_generation(&self, draft: GenerationDraft) -> Result<Reservation> {
        let mut tables = self.write()?;
        let generation = Generation::new(draft);
        let entry = tables.apply(CreditMutation::deduction(generation.user_id, generation.id))?;
        tables.generations.insert(generation.id, generation.clone());
        tables.generation_order.push(generation.id);
        Ok(Reservation { generation, entry })
    }

    async fn generation(&self, id: Uuid) -> Result<Option<Generation>> {
        Ok(self.read()?.generations.get(&id).cloned())
    }

    async fn generations_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Generation>> {
        let tables = self.read()?;
        Ok(tables
            .generation_order
            .iter()
            .rev()
            .filter_map(|id| tables.generations.get(id))
            .filter(|g| g.user_id == user_id)
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Generation> {
        let mut tables = self.write()?;
        let generation = tables.generation_mut(id)?;
        if generation.status != GenerationStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "generation {id} is {}, expected pending",
                generation.status
            )));
        }
        generation.status = GenerationStatus::Processing;
        generation.updated_at = Utc::now();
        Ok(generation.clone())
    }

    async fn mark_completed(&self, id: Uuid, storage_path: String) -> Result<Generation> {
        if storage_path.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "completed generation requires a storage path".into(),
            ));
        }

        let mut tables = self.write()?;
        let generation = tables.generation_mut(id)?;
        if generation.status != GenerationStatus::Processing {
            return Err(CoreError::Conflict(format!(
                "generation {id} is {}, expected processing",
                generation.status
            )));
        }
        let now = Utc::now();
        generation.status = GenerationStatus::Completed;
        generation.storage_path = Some(storage_path);
        generation.completed_at = Some(now);
        generation.updated_at = now;
        Ok(generation.clone())
    }

    async fn fail_and_refund(&self, id: Uuid, error_message: String) -> Result<Refund> {
        let mut tables = self.write()?;
        let (user_id, status) = {
            let generation = tables.generation_mut(id)?;
            (generation.user_id, generation.status)
        };
        if status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "generation {id} is already {status}"
            )));
        }

        // Refund first: if it is rejected the record stays untouched.
        let entry = tables.apply(CreditMutation::refund(user_id, id))?;

        let generation = tables.generation_mut(id)?;
        generation.status = GenerationStatus::Failed;
        generation.error_message = Some(error_message);
        generation.storage_path = None;
        generation.updated_at = Utc::now();

        Ok(Refund {
            generation: generation.clone(),
            entry,
        })
    }

    async fn stale_generations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Generation>> {
        Ok(self
            .read()?
            .generations
            .values()
            .filter(|g| !g.status.is_terminal() && g.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<()> {
        self.write()?.audit.push(event);
        Ok(())
    }
}

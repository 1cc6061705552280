//! SQLite Record Store
//!
//! Each [`Store`] method is one trip to the connection thread. Composite
//! effects (balance + ledger entry, deduction + generation, failure +
//! refund) run in an IMMEDIATE transaction, so the write lock is held from
//! the first read and a rejected step rolls the whole operation back.
//!
//! `credit_transactions.stripe_session_id` and `idempotency_key` are UNIQUE;
//! the explicit lookups below only produce friendlier conflict messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rexpet_core::{
    Account, AuditEvent, CoreError, CreditMutation, Generation, GenerationDraft,
    GenerationStatus, LedgerEntry, Refund, Reservation, Result, SourceImage, Store, Style,
};
use rusqlite::{Connection as SqlConnection, OptionalExtension, TransactionBehavior, params};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::database::call;
use crate::error::SqlError;
use crate::row::{
    self, ACCOUNT_COLUMNS, AUDIT_COLUMNS, ENTRY_COLUMNS, GENERATION_COLUMNS, IMAGE_COLUMNS,
    STYLE_COLUMNS, ts,
};

type CallResult<T> = std::result::Result<T, SqlError>;

/// Durable [`Store`] over one SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Audit trail in insertion order, for operators and tests
    pub async fn audit_events(&self) -> Result<Vec<AuditEvent>> {
        call(&self.conn, |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {AUDIT_COLUMNS} FROM audit_events ORDER BY seq"))?;
            let events = stmt
                .query_map([], row::audit_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
        .await
    }
}

fn ensure_account_in(conn: &SqlConnection, user_id: Uuid, now: &str) -> CallResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO accounts (user_id, credit_balance, created_at, updated_at) \
         VALUES (?1, 0, ?2, ?2)",
        params![user_id.to_string(), now],
    )?;
    Ok(())
}

fn account_in(conn: &SqlConnection, user_id: Uuid) -> CallResult<Option<Account>> {
    Ok(conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1"),
            params![user_id.to_string()],
            row::account,
        )
        .optional()?)
}

fn generation_in(conn: &SqlConnection, id: Uuid) -> CallResult<Generation> {
    conn.query_row(
        &format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE id = ?1"),
        params![id.to_string()],
        row::generation,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("Generation", id).into())
}

fn status_in(conn: &SqlConnection, id: Uuid) -> CallResult<(Uuid, GenerationStatus)> {
    conn.query_row(
        "SELECT user_id, status FROM generations WHERE id = ?1",
        params![id.to_string()],
        |r| Ok((row::uuid_at(r, 0)?, row::parsed_at::<GenerationStatus>(r, 1)?)),
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("Generation", id).into())
}

fn reference_taken(conn: &SqlConnection, column: &str, value: &str) -> CallResult<bool> {
    let sql = format!("SELECT 1 FROM credit_transactions WHERE {column} = ?1");
    Ok(conn.query_row(&sql, params![value], |_| Ok(())).optional()?.is_some())
}

/// Single code path for every balance change
fn apply_in(conn: &SqlConnection, mutation: CreditMutation) -> CallResult<LedgerEntry> {
    if let Some(session) = &mutation.stripe_session_id {
        if reference_taken(conn, "stripe_session_id", session)? {
            return Err(CoreError::Conflict(format!(
                "payment session {session} already recorded"
            ))
            .into());
        }
    }
    if let Some(key) = &mutation.idempotency_key {
        if reference_taken(conn, "idempotency_key", key)? {
            return Err(CoreError::Conflict(format!("idempotency key {key} already used")).into());
        }
    }

    let now = Utc::now();
    let stamp = ts(&now);
    let user = mutation.user_id.to_string();
    ensure_account_in(conn, mutation.user_id, &stamp)?;

    let balance: i64 = conn.query_row(
        "SELECT credit_balance FROM accounts WHERE user_id = ?1",
        params![user],
        |r| r.get(0),
    )?;
    let new_balance = balance.checked_add(mutation.amount).ok_or_else(|| {
        CoreError::InvalidArgument(format!(
            "credit amount {} overflows the balance",
            mutation.amount
        ))
    })?;
    if new_balance < 0 {
        return Err(CoreError::InsufficientCredits { balance }.into());
    }

    conn.execute(
        "UPDATE accounts SET credit_balance = credit_balance + ?1, updated_at = ?2 \
         WHERE user_id = ?3",
        params![mutation.amount, stamp, user],
    )?;

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

    conn.execute(
        &format!("INSERT INTO credit_transactions ({ENTRY_COLUMNS}) \
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            entry.id.to_string(),
            user,
            entry.kind.as_str(),
            entry.amount,
            entry.balance_after,
            entry.stripe_session_id,
            entry.idempotency_key,
            entry.description,
            entry.generation_id.map(|id| id.to_string()),
            stamp,
        ],
    )?;

    Ok(entry)
}

fn insert_generation_in(conn: &SqlConnection, generation: &Generation) -> CallResult<()> {
    conn.execute(
        &format!("INSERT INTO generations ({GENERATION_COLUMNS}) \
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            generation.id.to_string(),
            generation.user_id.to_string(),
            generation.original_id.to_string(),
            generation.style_id.to_string(),
            generation.custom_prompt,
            generation.status.as_str(),
            generation.storage_path,
            generation.error_message,
            ts(&generation.created_at),
            ts(&generation.updated_at),
            generation.completed_at.as_ref().map(ts),
            ts(&generation.expires_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_account(&self, user_id: Uuid) -> Result<Account> {
        call(&self.conn, move |conn| {
            ensure_account_in(conn, user_id, &ts(&Utc::now()))?;
            account_in(conn, user_id)?
                .ok_or_else(|| CoreError::not_found("Account", user_id).into())
        })
        .await
    }

    async fn account(&self, user_id: Uuid) -> Result<Option<Account>> {
        call(&self.conn, move |conn| account_in(conn, user_id)).await
    }

    async fn set_display_name(
        &self,
        user_id: Uuid,
        display_name: Option<String>,
    ) -> Result<Account> {
        call(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO accounts (user_id, credit_balance, display_name, created_at, updated_at) \
                 VALUES (?1, 0, ?2, ?3, ?3) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                 display_name = excluded.display_name, updated_at = excluded.updated_at",
                params![user_id.to_string(), display_name, ts(&Utc::now())],
            )?;
            account_in(conn, user_id)?
                .ok_or_else(|| CoreError::not_found("Account", user_id).into())
        })
        .await
    }

    async fn apply_credit(&self, mutation: CreditMutation) -> Result<LedgerEntry> {
        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let entry = apply_in(&tx, mutation)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn entry_for_session(&self, session_id: &str) -> Result<Option<LedgerEntry>> {
        let session_id = session_id.to_string();
        call(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {ENTRY_COLUMNS} FROM credit_transactions \
                         WHERE stripe_session_id = ?1"
                    ),
                    params![session_id],
                    row::entry,
                )
                .optional()?)
        })
        .await
    }

    async fn ledger(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        call(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM credit_transactions WHERE user_id = ?1 ORDER BY seq"
            ))?;
            let entries = stmt
                .query_map(params![user_id.to_string()], row::entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn insert_source_image(&self, image: SourceImage) -> Result<SourceImage> {
        call(&self.conn, move |conn| {
            conn.execute(
                &format!("INSERT INTO source_images ({IMAGE_COLUMNS}) \
                          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    image.id.to_string(),
                    image.user_id.to_string(),
                    image.storage_path,
                    image.file_name,
                    image.file_size,
                    image.mime_type,
                    ts(&image.created_at),
                    ts(&image.expires_at),
                ],
            )?;
            Ok(image)
        })
        .await
    }

    async fn source_image(&self, id: Uuid) -> Result<Option<SourceImage>> {
        call(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {IMAGE_COLUMNS} FROM source_images WHERE id = ?1"),
                    params![id.to_string()],
                    row::source_image,
                )
                .optional()?)
        })
        .await
    }

    async fn upsert_style(&self, style: Style) -> Result<Style> {
        call(&self.conn, move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO styles ({STYLE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT (id) DO UPDATE SET \
                     name = excluded.name, description = excluded.description, \
                     preview_url = excluded.preview_url, \
                     prompt_template = excluded.prompt_template, \
                     is_active = excluded.is_active, sort_order = excluded.sort_order"
                ),
                params![
                    style.id.to_string(),
                    style.name,
                    style.description,
                    style.preview_url,
                    style.prompt_template,
                    style.is_active,
                    style.sort_order,
                    ts(&style.created_at),
                ],
            )?;
            Ok(style)
        })
        .await
    }

    async fn style(&self, id: Uuid) -> Result<Option<Style>> {
        call(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {STYLE_COLUMNS} FROM styles WHERE id = ?1"),
                    params![id.to_string()],
                    row::style,
                )
                .optional()?)
        })
        .await
    }

    async fn styles(&self) -> Result<Vec<Style>> {
        call(&self.conn, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STYLE_COLUMNS} FROM styles ORDER BY sort_order, name"
            ))?;
            let styles = stmt
                .query_map([], row::style)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(styles)
        })
        .await
    }

    async fn reserve_generation(&self, draft: GenerationDraft) -> Result<Reservation> {
        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let generation = Generation::new(draft);
            let entry = apply_in(&tx, CreditMutation::deduction(generation.user_id, generation.id))?;
            insert_generation_in(&tx, &generation)?;
            tx.commit()?;
            Ok(Reservation { generation, entry })
        })
        .await
    }

    async fn generation(&self, id: Uuid) -> Result<Option<Generation>> {
        call(&self.conn, move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE id = ?1"),
                    params![id.to_string()],
                    row::generation,
                )
                .optional()?)
        })
        .await
    }

    async fn generations_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Generation>> {
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.saturating_mul(page_size)).unwrap_or(i64::MAX);

        call(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GENERATION_COLUMNS} FROM generations WHERE user_id = ?1 \
                 ORDER BY seq DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit, offset], row::generation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Generation> {
        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (_, status) = status_in(&tx, id)?;
            if status != GenerationStatus::Pending {
                return Err(CoreError::Conflict(format!(
                    "generation {id} is {status}, expected pending"
                ))
                .into());
            }
            tx.execute(
                "UPDATE generations SET status = 'processing', updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), ts(&Utc::now())],
            )?;
            let generation = generation_in(&tx, id)?;
            tx.commit()?;
            Ok(generation)
        })
        .await
    }

    async fn mark_completed(&self, id: Uuid, storage_path: String) -> Result<Generation> {
        if storage_path.trim().is_empty() {
            return Err(CoreError::InvalidArgument(
                "completed generation requires a storage path".into(),
            ));
        }

        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (_, status) = status_in(&tx, id)?;
            if status != GenerationStatus::Processing {
                return Err(CoreError::Conflict(format!(
                    "generation {id} is {status}, expected processing"
                ))
                .into());
            }
            let now = ts(&Utc::now());
            tx.execute(
                "UPDATE generations SET status = 'completed', storage_path = ?2, \
                 completed_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), storage_path, now],
            )?;
            let generation = generation_in(&tx, id)?;
            tx.commit()?;
            Ok(generation)
        })
        .await
    }

    async fn fail_and_refund(&self, id: Uuid, error_message: String) -> Result<Refund> {
        call(&self.conn, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (user_id, status) = status_in(&tx, id)?;
            if status.is_terminal() {
                return Err(CoreError::Conflict(format!("generation {id} is already {status}")).into());
            }

            // Refund first: if it is rejected the record stays untouched.
            let entry = apply_in(&tx, CreditMutation::refund(user_id, id))?;

            tx.execute(
                "UPDATE generations SET status = 'failed', error_message = ?2, \
                 storage_path = NULL, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), error_message, ts(&Utc::now())],
            )?;
            let generation = generation_in(&tx, id)?;
            tx.commit()?;
            Ok(Refund { generation, entry })
        })
        .await
    }

    async fn stale_generations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Generation>> {
        call(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GENERATION_COLUMNS} FROM generations \
                 WHERE status IN ('pending', 'processing') AND updated_at < ?1 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map(params![ts(&cutoff)], row::generation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<()> {
        let metadata = serde_json::to_string(&event.metadata)?;
        call(&self.conn, move |conn| {
            conn.execute(
                &format!("INSERT INTO audit_events ({AUDIT_COLUMNS}) \
                          VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    event.id.to_string(),
                    event.user_id.map(|id| id.to_string()),
                    event.event_type.as_str(),
                    metadata,
                    event.ip_address.map(|ip| ip.to_string()),
                    ts(&event.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

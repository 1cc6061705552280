//! Column codecs and row mappers
//!
//! IDs are hyphenated UUID text. Timestamps are RFC 3339 UTC with fixed
//! nanosecond precision so text order is time order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rexpet_core::{
    Account, AuditEvent, AuditEventType, Generation, GenerationStatus, Job, LedgerEntry,
    SourceImage, Style, TransactionKind,
};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| Uuid::parse_str(&text).map_err(|e| conversion(idx, e)))
        .transpose()
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| {
            DateTime::parse_from_rfc3339(&text)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| conversion(idx, e))
        })
        .transpose()
}

pub(crate) fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion(idx, e))
}

pub(crate) const ACCOUNT_COLUMNS: &str =
    "user_id, credit_balance, display_name, created_at, updated_at";

pub(crate) fn account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user_id: uuid_at(row, 0)?,
        credit_balance: row.get(1)?,
        display_name: row.get(2)?,
        created_at: ts_at(row, 3)?,
        updated_at: ts_at(row, 4)?,
    })
}

pub(crate) const ENTRY_COLUMNS: &str = "id, user_id, kind, amount, balance_after, \
     stripe_session_id, idempotency_key, description, generation_id, created_at";

pub(crate) fn entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        kind: parsed_at::<TransactionKind>(row, 2)?,
        amount: row.get(3)?,
        balance_after: row.get(4)?,
        stripe_session_id: row.get(5)?,
        idempotency_key: row.get(6)?,
        description: row.get(7)?,
        generation_id: opt_uuid_at(row, 8)?,
        created_at: ts_at(row, 9)?,
    })
}

pub(crate) const IMAGE_COLUMNS: &str =
    "id, user_id, storage_path, file_name, file_size, mime_type, created_at, expires_at";

pub(crate) fn source_image(row: &Row<'_>) -> rusqlite::Result<SourceImage> {
    Ok(SourceImage {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        storage_path: row.get(2)?,
        file_name: row.get(3)?,
        file_size: row.get(4)?,
        mime_type: row.get(5)?,
        created_at: ts_at(row, 6)?,
        expires_at: ts_at(row, 7)?,
    })
}

pub(crate) const STYLE_COLUMNS: &str =
    "id, name, description, preview_url, prompt_template, is_active, sort_order, created_at";

pub(crate) fn style(row: &Row<'_>) -> rusqlite::Result<Style> {
    Ok(Style {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        preview_url: row.get(3)?,
        prompt_template: row.get(4)?,
        is_active: row.get(5)?,
        sort_order: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}

pub(crate) const GENERATION_COLUMNS: &str = "id, user_id, original_id, style_id, custom_prompt, \
     status, storage_path, error_message, created_at, updated_at, completed_at, expires_at";

pub(crate) fn generation(row: &Row<'_>) -> rusqlite::Result<Generation> {
    Ok(Generation {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        original_id: uuid_at(row, 2)?,
        style_id: uuid_at(row, 3)?,
        custom_prompt: row.get(4)?,
        status: parsed_at::<GenerationStatus>(row, 5)?,
        storage_path: row.get(6)?,
        error_message: row.get(7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
        completed_at: opt_ts_at(row, 10)?,
        expires_at: ts_at(row, 11)?,
    })
}

pub(crate) const JOB_COLUMNS: &str =
    "id, generation_id, status, attempts, enqueued_at, locked_until";

pub(crate) fn job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_at(row, 0)?,
        generation_id: uuid_at(row, 1)?,
        status: parsed_at(row, 2)?,
        attempts: row.get(3)?,
        enqueued_at: ts_at(row, 4)?,
        locked_until: opt_ts_at(row, 5)?,
    })
}

pub(crate) const AUDIT_COLUMNS: &str =
    "id, user_id, event_type, metadata, ip_address, created_at";

pub(crate) fn audit_event(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let metadata: String = row.get(3)?;
    Ok(AuditEvent {
        id: uuid_at(row, 0)?,
        user_id: opt_uuid_at(row, 1)?,
        event_type: parsed_at::<AuditEventType>(row, 2)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion(3, e))?,
        ip_address: row
            .get::<_, Option<String>>(4)?
            .map(|ip| ip.parse().map_err(|e| conversion(4, e)))
            .transpose()?,
        created_at: ts_at(row, 5)?,
    })
}

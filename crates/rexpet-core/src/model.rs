//! Domain Models
//!
//! Records shared by the ledger, the generation pipeline and the HTTP surface.
//! Credit amounts are signed integers; a balance is never negative.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Retention for uploaded originals and generated results
pub const RETENTION_DAYS: i64 = 30;

/// A user's credit account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: Uuid,

    /// Current balance, always equal to the sum of the user's ledger entries
    pub credit_balance: i64,

    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            credit_balance: 0,
            display_name: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ledger entry category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Deduction,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Deduction => "deduction",
            TransactionKind::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionKind::Purchase),
            "deduction" => Ok(TransactionKind::Deduction),
            "refund" => Ok(TransactionKind::Refund),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Immutable record of one balance mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,

    /// Signed change applied to the balance
    pub amount: i64,

    /// Balance snapshot right after this entry
    pub balance_after: i64,

    /// Payment session that paid for a purchase (unique)
    pub stripe_session_id: Option<String>,

    /// Caller-supplied dedupe key (unique)
    pub idempotency_key: Option<String>,

    pub description: Option<String>,

    /// Generation a deduction or refund belongs to
    pub generation_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// Metadata for an uploaded source image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub storage_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SourceImage {
    /// Build a record with a fresh storage path `{user_id}/{random_id}.{ext}`.
    ///
    /// The extension follows the content type; the client file name is kept
    /// for display only and never reaches the object key.
    pub fn new(
        user_id: Uuid,
        file_name: impl Into<String>,
        file_size: i64,
        mime_type: impl Into<String>,
    ) -> Self {
        let mime_type = mime_type.into();
        let ext = extension_for(&mime_type);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            user_id,
            storage_path: format!("{user_id}/{}.{ext}", Uuid::new_v4()),
            file_name: file_name.into(),
            file_size,
            mime_type,
            created_at: now,
            expires_at: now + Duration::days(RETENTION_DAYS),
        }
    }
}

/// Object key extension for an image content type
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Lifecycle of a generation record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GenerationStatus::Pending),
            "processing" => Ok(GenerationStatus::Processing),
            "completed" => Ok(GenerationStatus::Completed),
            "failed" => Ok(GenerationStatus::Failed),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown generation status: {other}"
            ))),
        }
    }
}

/// Tracked unit of work: one original plus one style into one result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub original_id: Uuid,
    pub style_id: Uuid,
    pub custom_prompt: Option<String>,
    pub status: GenerationStatus,

    /// Present only when completed
    pub storage_path: Option<String>,

    /// Present only when failed
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Generation {
    pub fn new(draft: GenerationDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            original_id: draft.original_id,
            style_id: draft.style_id,
            custom_prompt: draft.custom_prompt,
            status: GenerationStatus::Pending,
            storage_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: now + Duration::days(RETENTION_DAYS),
        }
    }

    /// Deterministic result location
    pub fn result_path(&self) -> String {
        format!("{}/{}.png", self.user_id, self.id)
    }

    pub fn view(&self) -> GenerationView {
        GenerationView {
            id: self.id,
            status: self.status,
            storage_path: self.storage_path.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Everything the request handler knows before the record exists
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationDraft {
    pub user_id: Uuid,
    pub original_id: Uuid,
    pub style_id: Uuid,
    pub custom_prompt: Option<String>,
}

/// Public fields returned to a polling client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationView {
    pub id: Uuid,
    pub status: GenerationStatus,
    pub storage_path: Option<String>,
    pub error_message: Option<String>,
}

/// A named transformation template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    pub prompt_template: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Style {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            preview_url: None,
            prompt_template: prompt_template.into(),
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }
}

/// Audit event tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginAttempt,
    LoginSuccess,
    LoginFailed,
    CreditPurchase,
    CreditDeduction,
    CreditRefund,
    GenerationRequested,
    GenerationCompleted,
    GenerationFailed,
    PrintOrderCreated,
    PrintOrderPaid,
    AccountLocked,
    AccountDeleted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginAttempt => "login_attempt",
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::CreditPurchase => "credit_purchase",
            AuditEventType::CreditDeduction => "credit_deduction",
            AuditEventType::CreditRefund => "credit_refund",
            AuditEventType::GenerationRequested => "generation_requested",
            AuditEventType::GenerationCompleted => "generation_completed",
            AuditEventType::GenerationFailed => "generation_failed",
            AuditEventType::PrintOrderCreated => "print_order_created",
            AuditEventType::PrintOrderPaid => "print_order_paid",
            AuditEventType::AccountLocked => "account_locked",
            AuditEventType::AccountDeleted => "account_deleted",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| CoreError::InvalidArgument(format!("unknown audit event type: {s}")))
    }
}

/// Append-only domain event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub metadata: serde_json::Value,
    pub ip_address: Option<IpAddr>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, user_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            metadata: serde_json::Value::Null,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.ip_address = ip;
        self
    }
}

//! # rexpet-core
//!
//! Credit ledger, generation state machine types and the storage contracts
//! the RexPet services are built on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │  accounts ── ledger (append-only) ── generations ── audit    │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                    ▲                      ▲
//!  webhook grant      reserve / refund        worker transitions
//!
//!  ObjectStorage (originals, results)   ImageGenerator (Strategy)
//!  JobQueue (lease + visibility timeout)
//! ```
//!
//! Every balance change goes through [`Store::apply_credit`] or one of the
//! composite operations built on it, so `credit_balance` always equals the
//! sum of the user's ledger entries.

pub mod audit;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod storage;
pub mod store;

pub use audit::Auditor;
pub use error::{CoreError, Result};
pub use generator::{GeneratedImage, GenerationInput, GeneratorInfo, ImageGenerator};
pub use ledger::CreditMutation;
pub use model::{
    Account, AuditEvent, AuditEventType, Generation, GenerationDraft, GenerationStatus,
    GenerationView, LedgerEntry, SourceImage, Style, TransactionKind,
};
pub use queue::{DEFAULT_DEAD_LETTER_LIMIT, Job, JobQueue, JobStatus, MemoryJobQueue};
pub use storage::{Bucket, FsObjectStorage, MemoryObjectStorage, ObjectStorage};
pub use store::{MemoryStore, Refund, Reservation, Store};

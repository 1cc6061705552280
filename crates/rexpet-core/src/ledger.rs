//! Credit Ledger
//!
//! Every balance change is expressed as a [`CreditMutation`] and applied by the
//! store in one atomic step: the balance is adjusted by `amount` and exactly one
//! [`LedgerEntry`] is appended. A mutation that would take the balance below
//! zero is rejected, and so is one whose session reference or idempotency key
//! already appears in the ledger.

use uuid::Uuid;

use crate::model::{LedgerEntry, TransactionKind};

/// Description written on automatic refunds
pub const REFUND_DESCRIPTION: &str = "Generation failed: automatic refund";

/// Description written on generation deductions
pub const DEDUCTION_DESCRIPTION: &str = "Portrait generation";

/// A requested balance change, not yet applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditMutation {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub stripe_session_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
    pub generation_id: Option<Uuid>,
}

impl CreditMutation {
    /// Credits paid for through a completed checkout session
    pub fn purchase(user_id: Uuid, credits: i64, session_id: &str, package_id: &str) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Purchase,
            amount: credits,
            stripe_session_id: Some(session_id.to_string()),
            idempotency_key: Some(format!("stripe-{session_id}")),
            description: Some(format!("Purchased {credits} credits ({package_id})")),
            generation_id: None,
        }
    }

    /// One credit reserved for a generation
    pub fn deduction(user_id: Uuid, generation_id: Uuid) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Deduction,
            amount: -1,
            stripe_session_id: None,
            idempotency_key: None,
            description: Some(DEDUCTION_DESCRIPTION.into()),
            generation_id: Some(generation_id),
        }
    }

    /// One credit returned after a failed generation
    pub fn refund(user_id: Uuid, generation_id: Uuid) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Refund,
            amount: 1,
            stripe_session_id: None,
            idempotency_key: Some(format!("refund-{generation_id}")),
            description: Some(REFUND_DESCRIPTION.into()),
            generation_id: Some(generation_id),
        }
    }
}

/// Sum of signed amounts across entries
pub fn ledger_total(entries: &[LedgerEntry]) -> i64 {
    entries.iter().map(|e| e.amount).sum()
}

/// True when the append-only ledger reconciles to the balance
pub fn reconciles(entries: &[LedgerEntry], balance: i64) -> bool {
    ledger_total(entries) == balance
}

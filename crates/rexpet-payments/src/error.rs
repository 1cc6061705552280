//! Payment Error Types

use rexpet_core::CoreError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Completed session without usable credit metadata
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    /// Package id not in the price list
    #[error("Invalid package_id: {0}")]
    InvalidPackage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger or store failure
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl PaymentError {
    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Stripe(_) => "Payment processing failed. Please try again.".into(),
            PaymentError::WebhookSignature(_) => "Invalid signature".into(),
            PaymentError::WebhookParse(_) | PaymentError::MissingMetadata(_) => {
                "Missing metadata".into()
            }
            PaymentError::InvalidPackage(_) => "Invalid package_id".into(),
            PaymentError::Config(_) => "Service configuration error.".into(),
            PaymentError::Core(e) => e.user_message(),
        }
    }
}

impl From<PaymentError> for CoreError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Stripe(msg) => CoreError::Upstream(msg),
            PaymentError::WebhookSignature(msg) => CoreError::Unauthenticated(msg),
            PaymentError::WebhookParse(msg) | PaymentError::MissingMetadata(msg) => {
                CoreError::InvalidArgument(msg)
            }
            PaymentError::InvalidPackage(id) => {
                CoreError::InvalidArgument(format!("Invalid package_id: {id}"))
            }
            PaymentError::Config(msg) => CoreError::Persistence(msg),
            PaymentError::Core(e) => e,
        }
    }
}

//! Error Types

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error taxonomy shared by every handler and the worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Missing or invalid identity, or a bad webhook signature
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Unknown package, missing field, malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Balance too low to reserve a credit
    #[error("Insufficient credits: balance is {balance}")]
    InsufficientCredits { balance: i64 },

    /// Referenced entity absent or not owned by the caller
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payment or generation provider failed or returned unusable data
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Storage or database write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Duplicate unique reference, illegal state transition, object exists
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated(_) => "UNAUTHENTICATED",
            CoreError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CoreError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Upstream(_) => "UPSTREAM_ERROR",
            CoreError::Persistence(_) => "PERSISTENCE_ERROR",
            CoreError::Conflict(_) => "CONFLICT",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Unauthenticated(_) => "Unauthorized".into(),
            CoreError::InvalidArgument(msg) => msg.clone(),
            CoreError::InsufficientCredits { .. } => "Insufficient credits".into(),
            CoreError::NotFound { entity, .. } => format!("{entity} not found"),
            CoreError::Upstream(_) => {
                "An external service failed. Any reserved credit has been returned.".into()
            }
            CoreError::Persistence(_) => "An internal error occurred.".into(),
            CoreError::Conflict(msg) => msg.clone(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            CoreError::InsufficientCredits { balance: 0 }.code(),
            "INSUFFICIENT_CREDITS"
        );
        assert_eq!(CoreError::not_found("Style", "abc").code(), "NOT_FOUND");
    }

    #[test]
    fn test_not_found_message() {
        let err = CoreError::not_found("Generation", "42");
        assert_eq!(err.to_string(), "Generation not found: 42");
        assert_eq!(err.user_message(), "Generation not found");
    }
}

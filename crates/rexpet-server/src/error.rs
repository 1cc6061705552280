//! HTTP error mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rexpet_core::CoreError;
use rexpet_payments::PaymentError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler error; every variant renders as `{error, code}`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payments not configured")]
    PaymentsDisabled,
}

pub type AppResult<T> = Result<T, AppError>;

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::Core(err.into())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Core(core) => {
                let status = match core {
                    CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                    CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    CoreError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Upstream(_) => StatusCode::BAD_GATEWAY,
                    CoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    CoreError::Conflict(_) => StatusCode::CONFLICT,
                };
                (status, core.code(), core.user_message())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::PaymentsDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PAYMENTS_DISABLED",
                self.to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (CoreError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::InsufficientCredits { balance: 0 }, StatusCode::PAYMENT_REQUIRED),
            (CoreError::not_found("Generation", "g"), StatusCode::NOT_FOUND),
            (CoreError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (CoreError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (CoreError::Conflict("x".into()), StatusCode::CONFLICT),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_persistence_detail_hidden() {
        let (_, code, message) = AppError::from(CoreError::Persistence("disk on fire".into())).parts();
        assert_eq!(code, "PERSISTENCE_ERROR");
        assert!(!message.contains("disk"));
    }

    #[test]
    fn test_unknown_package_is_bad_request() {
        let err = AppError::from(PaymentError::InvalidPackage("gold".into()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}

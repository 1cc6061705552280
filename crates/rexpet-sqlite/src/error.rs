//! Error conversion between SQLite and the core taxonomy

use rexpet_core::CoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Error raised inside a `Connection::call` closure.
///
/// Transactions need to abort with domain errors (insufficient credits, an
/// illegal transition) as well as SQLite ones.
#[derive(Debug, Error)]
pub(crate) enum SqlError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Domain(#[from] CoreError),
}

impl From<SqlError> for CoreError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::Domain(e) => e,
            SqlError::Sqlite(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                CoreError::Conflict(message.unwrap_or_else(|| failure.to_string()))
            }
            SqlError::Sqlite(e) => CoreError::Persistence(e.to_string()),
        }
    }
}

/// Map a `call` failure, including a closed connection, into a core error
pub(crate) fn map_tr_err(err: tokio_rusqlite::Error<SqlError>) -> CoreError {
    match err {
        tokio_rusqlite::Error::Error(e) => e.into(),
        other => CoreError::Persistence(format!("database connection: {other}")),
    }
}

use axum::http::StatusCode;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Broken internal contract. Never retried.
    #[error("coding error: {0}")]
    Coding(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("missing capability {0}")]
    Forbidden(String),

    #[error("no content type manages {0} files")]
    UnsupportedExtension(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("could not allocate an attempt number")]
    AttemptNumberConflict,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::UnsupportedExtension(_) | AppError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Storage(StorageError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            AppError::AttemptNumberConflict => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Storage(_)
            | AppError::Coding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

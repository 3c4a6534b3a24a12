use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy for the response pipeline. Every path either recovers
/// locally (fallback provider, hydration downgrade) or ends in a persisted,
/// observable state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: &'static str, message: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("session is already assigned")]
    AssignmentConflict,

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AssignmentConflict => StatusCode::CONFLICT,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for (StatusCode, String) {
    fn from(err: CoreError) -> Self {
        (err.status_code(), err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use crate::cache::CacheError;
use delivery_attempts::AttemptError;
use event_schema::SchemaError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Body returned for every failure that is not the caller's fault
pub const GENERIC_ERROR_MESSAGE: &str = "could not perform operation";

/// Postgres unique violation
const UNIQUE_VIOLATION: &str = "23505";

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict on message {message_id}: expected {expected}, stored {actual}")]
    VersionConflict {
        message_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("transient store error: {0}")]
    TransientStore(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AppError::NotFound(e.to_string()),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                AppError::DuplicateKey(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| db_err.message().to_string()),
                )
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => AppError::Internal(e.to_string()),
            _ => AppError::TransientStore(e.to_string()),
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(e: SchemaError) -> Self {
        AppError::SchemaViolation(e.to_string())
    }
}

impl From<AttemptError> for AppError {
    fn from(e: AttemptError) -> Self {
        if e.is_transient() {
            AppError::TransientStore(e.to_string())
        } else {
            AppError::Internal(e.to_string())
        }
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::CacheUnavailable(e.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        AppError::Broker(e.to_string())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::TransientStore(_) | AppError::CacheUnavailable(_) | AppError::Broker(_) => {
                ErrorKind::Retryable
            }
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Short label used for metrics and dead-letter headers
    pub fn label(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start_server",
            AppError::BadRequest(_) => "bad_request",
            AppError::SchemaViolation(_) => "schema_violation",
            AppError::NotFound(_) => "not_found",
            AppError::VersionConflict { .. } => "version_conflict",
            AppError::DuplicateKey(_) => "duplicate_key",
            AppError::TransientStore(_) => "transient_store",
            AppError::CacheUnavailable(_) => "cache_unavailable",
            AppError::Broker(_) => "broker",
            AppError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::SchemaViolation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::VersionConflict { .. } | AppError::DuplicateKey(_) => StatusCode::CONFLICT,
            AppError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Only caller mistakes are echoed back; everything else stays in the logs
        let message = match self {
            AppError::BadRequest(msg) => msg.clone(),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": message }))
    }
}

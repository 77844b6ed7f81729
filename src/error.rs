use std::fmt::Display;

use thiserror::Error;

/// Classification of every error produced by the core.
///
/// The outer layers map these onto transport codes (see [`AppError::status_code`]);
/// the core only has to classify correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
    Data,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// No rows / no data for the requested key
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid caller input (unknown time window, zero shard count, bad upsert target)
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Store or data-source failure, cancelled cycle, or a recovered panic
    #[error("internal error: {0}")]
    Internal(String),
    /// Malformed payload from an external source or an unexpected column value
    #[error("data error: {0}")]
    Data(String),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        AppError::Data(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::Internal(_) => ErrorKind::Internal,
            AppError::Data(_) => ErrorKind::Data,
        }
    }

    /// HTTP status the surrounding application should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Internal | ErrorKind::Data => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    fn message(&self) -> &str {
        match self {
            AppError::NotFound(m)
            | AppError::BadRequest(m)
            | AppError::Internal(m)
            | AppError::Data(m) => m,
        }
    }

    fn with_message(kind: ErrorKind, msg: String) -> Self {
        match kind {
            ErrorKind::NotFound => AppError::NotFound(msg),
            ErrorKind::BadRequest => AppError::BadRequest(msg),
            ErrorKind::Internal => AppError::Internal(msg),
            ErrorKind::Data => AppError::Data(msg),
        }
    }

    /// Prefixes the message with operation context, keeping the kind unchanged.
    pub fn context(self, ctx: impl Display) -> Self {
        let msg = format!("{}: {}", ctx, self.message());
        Self::with_message(self.kind(), msg)
    }

    /// Appends a follow-up failure (a failed rollback) while keeping this error's kind.
    pub fn with_secondary(self, other: AppError) -> Self {
        let msg = format!("{}; {}", self.message(), other);
        Self::with_message(self.kind(), msg)
    }

    /// Joins several errors into one. The kind of the first error wins.
    pub fn join(errors: Vec<AppError>) -> Option<AppError> {
        let kind = errors.first()?.kind();
        if errors.len() == 1 {
            return errors.into_iter().next();
        }
        let msg = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        Some(Self::with_message(kind, msg))
    }
}

/// `anyhow`-style `.context()` for results carrying an [`AppError`].
pub trait ResultExt<T> {
    fn context(self, ctx: impl Display) -> Result<T>;

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, ctx: impl Display) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.context(f()))
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::Internal(format!("postgres: {}", err))
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        AppError::Internal(format!("postgres pool: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
                AppError::NotFound(format!("http: {}", err))
            },
            _ => AppError::Internal(format!("http: {}", err)),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Data(format!("json: {}", err))
    }
}

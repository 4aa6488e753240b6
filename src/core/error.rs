use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid call state: {0}")]
    State(String),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        cause: Option<anyhow::Error>,
    },

    #[error("Work failed: {0}")]
    Work(String),

    #[error("Admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Startup check '{check}' failed: {message}")]
    CheckFailed { check: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl CoreError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps an arbitrary cause, keeping its full chain both in the
    /// message and as a structured value.
    pub fn internal_from(cause: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{cause:#}"),
            cause: Some(cause),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

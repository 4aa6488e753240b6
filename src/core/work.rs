use async_trait::async_trait;
use thiserror::Error;

use crate::core::error::CoreError;
use crate::executor::context::{Session, StoreSession};
use crate::store::TxnMode;

/// How a failed unit of work should be treated at the call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected failure of the domain logic. Wrapped into a generic
    /// internal error before it reaches the caller.
    Recoverable,

    /// Programming or environment fault. Propagated unchanged.
    Fatal,
}

/// Failure raised by [`Work::run`] or [`SqlWork::run`]
///
/// Carries a tag instead of an exception hierarchy: the executor maps
/// recoverable failures to [`CoreError::Internal`] and lets fatal ones
/// through as [`CoreError::Work`]. The original cause chain is kept in
/// both the message and the structured `cause` value.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct WorkFailure {
    kind: FailureKind,
    message: String,
    cause: Option<anyhow::Error>,
}

impl WorkFailure {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Recoverable,
            message: message.into(),
            cause: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
            cause: None,
        }
    }

    /// Recoverable failure built from a cause, keeping its full chain
    pub fn recoverable_from(cause: anyhow::Error) -> Self {
        Self {
            kind: FailureKind::Recoverable,
            message: format!("{cause:#}"),
            cause: Some(cause),
        }
    }

    /// Fatal failure built from a cause, keeping its full chain
    pub fn fatal_from(cause: anyhow::Error) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: format!("{cause:#}"),
            cause: Some(cause),
        }
    }

    /// Attach a cause without rewriting the message
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Append the call description so the failure names what was running
    pub fn with_context(mut self, description: &str) -> Self {
        self.message = format!("{} (while {})", self.message, description);
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Boundary mapping applied by the executor after the behavior chain
    pub fn into_core(self) -> CoreError {
        match self.kind {
            FailureKind::Fatal => CoreError::Work(self.message),
            FailureKind::Recoverable => CoreError::Internal {
                message: self.message,
                cause: self.cause,
            },
        }
    }
}

impl From<CoreError> for WorkFailure {
    /// Lets work bodies use `?` on store and executor calls. Call-state
    /// violations stay fatal; everything else is a recoverable fault of
    /// the environment the work ran against.
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::State(msg) => Self::fatal(format!("Invalid call state: {msg}")),
            other => Self::recoverable_from(anyhow::Error::new(other)),
        }
    }
}

pub type WorkResult<T> = std::result::Result<T, WorkFailure>;

/// A unit of logic run under a privileged session
///
/// Implementations hold their own inputs and return a typed output.
/// `description` is used for audit logging and error context, so it
/// should name the operation, not the type.
#[async_trait]
pub trait Work: Send + Sync {
    type Output: Send;

    fn description(&self) -> &str;

    /// Transaction mode the executor opens for a fresh call. Nested
    /// calls inherit the mode of the enclosing transaction.
    fn transaction_mode(&self) -> TxnMode {
        TxnMode::ReadWrite
    }

    async fn run(&self, session: &Session) -> WorkResult<Self::Output>;
}

/// A unit of direct store access with no identity attached
///
/// Runs outside the behavior chain under a minimal transaction wrapper.
/// Used during startup before any identity exists.
#[async_trait]
pub trait SqlWork: Send + Sync {
    type Output: Send;

    fn description(&self) -> &str;

    fn transaction_mode(&self) -> TxnMode {
        TxnMode::ReadWrite
    }

    async fn run(&self, session: &StoreSession) -> WorkResult<Self::Output>;
}

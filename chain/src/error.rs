use alloy::transports::{RpcError, TransportErrorKind};
use anyhow::anyhow;

#[derive(Debug, thiserror::Error)]
/// The errors that can be raised while reading from the chain
pub enum Error {
    #[error("Application error encountered: {error}")]
    /// A request that reached the node but failed, retrying the same request will not help
    Application {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("InvalidArgument: {error}")]
    /// Invalid input, e.g. an inverted block range or a malformed address
    InvalidArgument {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("Transient error encountered: {error}")]
    /// A transport level failure or timeout that may resolve itself and can be retried
    Transient {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
}

impl Error {
    /// Create a transient error
    pub fn new_transient(error: impl Into<anyhow::Error>) -> Self {
        Self::Transient {
            error: error.into(),
        }
    }

    /// Create an application error
    pub fn new_app(error: impl Into<anyhow::Error>) -> Self {
        Self::Application {
            error: error.into(),
        }
    }

    /// Crate an InvalidArgument error
    pub fn new_invalid_arg(error: impl Into<anyhow::Error>) -> Self {
        Self::InvalidArgument {
            error: error.into(),
        }
    }

    /// True when the failed request may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Add context to the internal error. Works identically to `anyhow::context`
    pub fn context<C>(self, context: C) -> Self
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        match self {
            Error::Application { error } => Self::Application {
                error: error.context(context),
            },
            Error::InvalidArgument { error } => Self::InvalidArgument {
                error: error.context(context),
            },
            Error::Transient { error } => Self::Transient {
                error: error.context(context),
            },
        }
    }
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(value: RpcError<TransportErrorKind>) -> Self {
        match value {
            RpcError::Transport(err) => {
                if err.is_retry_err() {
                    Self::new_transient(anyhow!(err))
                } else {
                    Self::new_app(anyhow!(err))
                }
            }
            err => Self::new_app(anyhow!(err)),
        }
    }
}

impl From<alloy::contract::Error> for Error {
    fn from(value: alloy::contract::Error) -> Self {
        match value {
            alloy::contract::Error::TransportError(err) => err.into(),
            err => Self::new_app(anyhow!(err)),
        }
    }
}

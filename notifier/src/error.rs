#[derive(Debug, thiserror::Error)]
/// The Errors that can be raised while handling pushed activity
pub enum Error {
    #[error("Application error encountered: {error}")]
    /// An internal failure while processing a valid request
    Application {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("InvalidArgument: {error}")]
    /// A payload that cannot be parsed or is missing required fields
    InvalidArgument {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("Unauthorized: {error}")]
    /// A webhook request whose credentials did not verify
    Unauthorized {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
}

impl Error {
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

    /// Create an Unauthorized error
    pub fn new_unauthorized(error: impl Into<anyhow::Error>) -> Self {
        Self::Unauthorized {
            error: error.into(),
        }
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
            Error::Unauthorized { error } => Self::Unauthorized {
                error: error.context(context),
            },
        }
    }
}

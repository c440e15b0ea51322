use anyhow::anyhow;

#[derive(Debug, thiserror::Error)]
/// The Errors that can be raised by cache persistence
pub enum Error {
    #[error("Application error encountered: {error}")]
    /// A persisted document that cannot be used, e.g. it is not valid JSON
    Application {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("Fatal error encountered: {error}")]
    /// The backend cannot be used at all, e.g. the data directory is not writable
    Fatal {
        /// The error details that may include context and other information
        error: anyhow::Error,
    },
    #[error("Transient error encountered: {error}")]
    /// An I/O error that may resolve itself
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
    /// Create a fatal error
    pub fn new_fatal(error: impl Into<anyhow::Error>) -> Self {
        Self::Fatal {
            error: error.into(),
        }
    }

    /// Create an application error
    pub fn new_app(error: impl Into<anyhow::Error>) -> Self {
        Self::Application {
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
            Error::Fatal { error } => Self::Fatal {
                error: error.context(context),
            },
            Error::Transient { error } => Self::Transient {
                error: error.context(context),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::new_fatal(anyhow!(e)),
            _ => Self::new_transient(anyhow!(e)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            serde_json::error::Category::Io => Self::new_transient(anyhow!(e)),
            _ => Self::new_app(anyhow!(e)),
        }
    }
}

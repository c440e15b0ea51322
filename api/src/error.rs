use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// The error type of the HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request is missing a field or carries an invalid value
    #[error("{error}")]
    InvalidArgument {
        /// Error details
        error: anyhow::Error,
    },
    /// The request could not be authenticated
    #[error("{error}")]
    Unauthorized {
        /// Error details
        error: anyhow::Error,
    },
    /// Anything else went wrong while serving the request
    #[error("{error}")]
    Application {
        /// Error details
        error: anyhow::Error,
    },
}

impl Error {
    /// Create an invalid argument error
    pub fn new_invalid_arg(error: impl Into<anyhow::Error>) -> Self {
        Self::InvalidArgument {
            error: error.into(),
        }
    }

    /// Create an application error
    pub fn new_app(error: impl Into<anyhow::Error>) -> Self {
        Self::Application {
            error: error.into(),
        }
    }

    /// HTTP status of the error kind
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::Application { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<aquaflux_notifier::Error> for Error {
    fn from(value: aquaflux_notifier::Error) -> Self {
        match value {
            aquaflux_notifier::Error::InvalidArgument { error } => Self::InvalidArgument { error },
            aquaflux_notifier::Error::Unauthorized { error } => Self::Unauthorized { error },
            aquaflux_notifier::Error::Application { error } => Self::Application { error },
        }
    }
}

impl From<aquaflux_cache::Error> for Error {
    fn from(value: aquaflux_cache::Error) -> Self {
        Self::new_app(value)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(err = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

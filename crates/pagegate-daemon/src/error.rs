//! Error types for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pagegate_core::StoreError;
use thiserror::Error;
use tracing::error;

/// Errors that end a request with something other than a page or the
/// forbidden view.
///
/// Admission rejections are not errors here; they render the forbidden view.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The page document could not be loaded or persisted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Content for an admitted page could not be read.
    #[error("content '{reference}' unavailable: {source}")]
    ContentUnavailable {
        /// The content reference from the page document.
        reference: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status code for this error.
    ///
    /// - NotFound: 404 Not Found
    /// - everything else: 500 Internal Server Error
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::ContentUnavailable { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        // The body never carries the error itself: paths, parse errors and
        // allocation state stay in the log.
        let body = match &self {
            Self::NotFound => "Not Found",
            Self::Store(_) | Self::ContentUnavailable { .. } | Self::Internal(_) => {
                "Internal Server Error"
            },
        };

        (status, body).into_response()
    }
}

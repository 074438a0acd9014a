//! HTTP-facing errors and their status mapping.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};
use undertow_core::{IndexError, ReaderError};

use crate::handlers::range::RangeError;
use crate::signing::SigningError;

/// Errors a web handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Signature rejected: {0}")]
    Signature(#[from] SigningError),

    #[error("Range rejected: {0}")]
    Range(#[from] RangeError),

    #[error("File {path} not found in folder {folder}")]
    NotFound { folder: String, path: String },

    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Read failed: {0}")]
    Reader(#[from] ReaderError),

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl From<IndexError> for WebError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::FileNotFound { folder, path } => WebError::NotFound {
                folder: folder.to_string(),
                path,
            },
            other => WebError::Index(other),
        }
    }
}

impl WebError {
    /// Status code this error answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Signature(_) => StatusCode::FORBIDDEN,
            WebError::Range(RangeError::Unsatisfiable { .. }) => StatusCode::RANGE_NOT_SATISFIABLE,
            WebError::Range(RangeError::Malformed { .. }) => StatusCode::BAD_REQUEST,
            WebError::Range(RangeError::MultiRangeUnsupported) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::NotFound { .. } => StatusCode::NOT_FOUND,
            WebError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            WebError::Index(_) | WebError::Reader(_) | WebError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let mut response = (status, self.to_string()).into_response();
        response
            .headers_mut()
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        if let WebError::Range(RangeError::Unsatisfiable { size }) = self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use undertow_core::{FolderId, PullError};

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            WebError::from(SigningError::Invalid).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebError::from(RangeError::MultiRangeUnsupported).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WebError::from(ReaderError::Pull(PullError::Cancelled)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_file_not_found_maps_to_404() {
        let error = WebError::from(IndexError::FileNotFound {
            folder: FolderId::new("movies"),
            path: "gone.mkv".to_string(),
        });
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unsatisfiable_carries_content_range() {
        let response = WebError::from(RangeError::Unsatisfiable { size: 1000 }).into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    }
}

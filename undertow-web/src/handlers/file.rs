//! `/file` streaming handler.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::Response;
use futures::{StreamExt, future, stream};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use undertow_core::streaming::{PlaybackThrottle, stream_range};
use undertow_core::{FolderId, Puller, RangeReader, ReaderError};

use super::range::{RangeError, extract_range_header, parse_range_header};
use crate::error::WebError;
use crate::server::AppState;

/// Query parameters of a signed file URL, read after the signature checks out.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub folder: String,
    pub path: String,
}

/// MIME type for a file path, from its extension.
pub fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Streams a file, or one byte range of it, to the client.
///
/// The signature is checked before anything else. The first chunk is fetched
/// before headers are sent so that a failing fetch still becomes a 500; a
/// failure later in the body truncates the response instead.
///
/// # Errors
///
/// - `WebError::Signature` - Missing or invalid signature (403)
/// - `WebError::Range` - Multiple ranges (500) or unsatisfiable range (416)
/// - `WebError::NotFound` - Index has no such file (404)
/// - `WebError::Reader` - First chunk could not be fetched (500)
pub async fn serve_file(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |pq| pq.as_str());
    state.signer.verify(path_and_query)?;

    let requested_range = match extract_range_header(&headers)?.map(parse_range_header) {
        Some(Ok(range)) => Some(range),
        Some(Err(RangeError::Malformed { value })) => {
            debug!("Ignoring malformed range header {:?}", value);
            None
        }
        Some(Err(error)) => return Err(error.into()),
        None => None,
    };

    let Query(query) = Query::<FileQuery>::try_from_uri(&uri).map_err(|e| WebError::BadRequest {
        reason: e.body_text(),
    })?;
    let folder = FolderId::new(query.folder);
    let file = Arc::new(state.index.resolve_file(&folder, &query.path).await?);

    let (status, span, content_range) = match requested_range {
        Some(range) => {
            let satisfied = range.resolve(file.size)?;
            (
                StatusCode::PARTIAL_CONTENT,
                satisfied.span(),
                Some(satisfied.content_range()),
            )
        }
        None => (StatusCode::OK, 0..file.size, None),
    };
    let length = span.end - span.start;

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type_for(&file.path))
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0");
    if let Some(content_range) = content_range {
        response = response.header(header::CONTENT_RANGE, content_range);
    }

    if method == Method::HEAD || length == 0 {
        return response
            .body(Body::empty())
            .map_err(|e| WebError::Internal {
                reason: e.to_string(),
            });
    }

    let puller = Puller::new(
        state.index.clone(),
        state.transport.clone(),
        state.cache.clone(),
        state.config.puller.clone(),
    );
    let mut reader = RangeReader::new(
        Arc::new(puller),
        state.local.clone(),
        file.clone(),
        CancellationToken::new(),
    );
    if let Some(progress) = &state.progress {
        reader = reader.with_progress(progress.clone());
    }

    let chunk_size = state.config.server.stream_chunk_size.max(1);
    let first_length = (chunk_size as u64).min(length) as usize;
    let mut throttle =
        PlaybackThrottle::from_config(state.config.server.throttle_bytes_per_second);
    let first = reader.read_chunk(span.start, first_length).await?;
    if let Some(throttle) = throttle.as_mut() {
        throttle.pace(first.len()).await;
    }

    info!(
        "Streaming {} bytes of {}/{} starting at {}",
        length, file.folder, file.path, span.start
    );

    let rest = stream_range(
        reader,
        span.start + first.len() as u64..span.end,
        chunk_size,
        throttle,
    );
    let body = stream::once(future::ready(Ok::<_, ReaderError>(first))).chain(rest);

    response
        .body(Body::from_stream(body))
        .map_err(|e| WebError::Internal {
            reason: e.to_string(),
        })
}

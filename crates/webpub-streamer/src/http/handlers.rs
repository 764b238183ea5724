//! HTTP request handlers for publication endpoints.

use crate::error::{FetchError, ResolveError};
use crate::fetcher::AssetReader;
use crate::http::range::{ByteRange, RangeOutcome, Validators};
use crate::server::AppState;
use crate::static_assets::StaticAssetError;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::io::{Read, SeekFrom};
use std::sync::Arc;

/// Size of the chunks an asset body is streamed in.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

const JAVASCRIPT: &str = "text/javascript";

/// Authority the client used to reach us.
///
/// HTTP/1.1 carries it in `Host`; HTTP/2 in the request URI.
fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(ToString::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

/// Handle GET /viewer.js.
pub async fn handle_viewer(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let script = state.static_assets().viewer()?;
    Ok(([(header::CONTENT_TYPE, JAVASCRIPT)], script).into_response())
}

/// Handle GET /sw.js.
pub async fn handle_service_worker(
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let script = state.static_assets().service_worker()?;
    Ok(([(header::CONTENT_TYPE, JAVASCRIPT)], script).into_response())
}

/// Handle GET /{identifier}/ and /{identifier}/index.html.
///
/// Renders the viewer shell page for a publication.
pub async fn handle_index(
    Path(identifier): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    crate::identifier::decode(&identifier).map_err(ResolveError::from)?;
    let page = state.static_assets().render_index(&identifier)?;
    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        page,
    )
        .into_response())
}

/// Handle GET /{identifier}/manifest.json.
///
/// Returns the publication manifest. The `self` link always reflects the host
/// of the current request.
///
/// # Errors
///
/// Returns `AppError` if the identifier is invalid or the publication cannot
/// be loaded.
pub async fn handle_manifest(
    Path(identifier): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    tracing::debug!("Handling manifest request for {}", identifier);

    let host = request_host(&headers, &uri);
    let entry = state.cache().resolve(&identifier, &host).await?;

    let manifest_url = crate::identifier::manifest_url(&host, &identifier);
    let publication = entry.publication();
    let body = if publication.manifest_url() == Some(manifest_url.as_str()) {
        serde_json::to_vec(&**publication)
    } else {
        serde_json::to_vec(&publication.with_manifest_url(&manifest_url))
    }
    .map_err(|e| AppError::Internal(format!("manifest serialization failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response())
}

/// Handle GET /{identifier}/{*asset}.
///
/// Streams one asset of the publication, honoring byte ranges and cache
/// validators.
///
/// # Errors
///
/// Returns `AppError` if the identifier is invalid, the publication cannot be
/// loaded, or the asset cannot be found or read.
pub async fn handle_asset(
    Path((identifier, asset)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    tracing::debug!("Handling asset request for {} in {}", asset, identifier);

    let host = request_host(&headers, &uri);
    let entry = state.cache().resolve(&identifier, &host).await?;

    let fetcher = Arc::clone(state.fetcher());
    let publication = Arc::clone(entry.publication());
    let asset_name = asset.clone();
    let source = tokio::task::spawn_blocking(move || fetcher.fetch(&publication, &asset_name))
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;

    let length = source.length;
    let validators = Validators::new(&identifier, &asset, length, entry.loaded_at());

    let builder = Response::builder()
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, &validators.etag)
        .header(header::LAST_MODIFIED, validators.last_modified_header());

    if validators.not_modified(&headers) {
        return build(builder.status(StatusCode::NOT_MODIFIED), Body::empty());
    }

    let content_type = HeaderValue::from_str(&source.media_type)
        .unwrap_or_else(|_| HeaderValue::from_static(crate::fetcher::DEFAULT_MEDIA_TYPE));
    let builder = builder.header(header::CONTENT_TYPE, content_type);

    let (builder, range) = match validators.select_range(&headers, length) {
        RangeOutcome::Full => (builder.status(StatusCode::OK), ByteRange::full(length)),
        RangeOutcome::Partial(range) => (
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, range.content_range(length)),
            Some(range),
        ),
        RangeOutcome::Unsatisfiable => {
            return build(
                builder
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{length}")),
                Body::empty(),
            );
        }
    };

    let builder = builder.header(
        header::CONTENT_LENGTH,
        range.map_or(0, |range| range.len()),
    );

    let body = match range {
        Some(range) if method != Method::HEAD => stream_range(source.reader, range),
        _ => Body::empty(),
    };

    build(builder, body)
}

fn build(builder: axum::http::response::Builder, body: Body) -> Result<Response, AppError> {
    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {e}")))
}

/// Stream `range` of `reader` from a blocking task.
///
/// The reader is driven on the blocking pool and hands chunks over a bounded
/// channel, so slow clients apply backpressure to the read.
fn stream_range(mut reader: Box<dyn AssetReader>, range: ByteRange) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(4);

    tokio::task::spawn_blocking(move || {
        if let Err(e) = reader.seek(SeekFrom::Start(range.start)) {
            let _ = tx.blocking_send(Err(e));
            return;
        }

        let mut remaining = range.len();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(STREAM_CHUNK_SIZE, |r| r.min(STREAM_CHUNK_SIZE));
            match reader.read(&mut buf[..want]) {
                Ok(0) => {
                    let _ = tx.blocking_send(Err(std::io::ErrorKind::UnexpectedEof.into()));
                    return;
                }
                Ok(n) => {
                    remaining -= n as u64;
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        // Client went away.
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Asset read failed mid-stream: {}", e);
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            }
        }
    });

    Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// Application-level error type for HTTP handlers.
///
/// Bodies are fixed strings; details are logged, never sent to the client.
#[derive(Debug)]
pub enum AppError {
    /// Identifier could not be decoded (400)
    BadIdentifier(String),
    /// Asset not found in the publication (404)
    AssetNotFound(String),
    /// Publication could not be parsed (500)
    LoadFailed(String),
    /// Asset could not be read (500)
    ReadFailed(String),
    /// Viewer shell file missing (500)
    ShellUnavailable(String),
    /// Any other server-side failure (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadIdentifier(detail) => {
                tracing::warn!("Bad identifier: {}", detail);
                (StatusCode::BAD_REQUEST, "invalid publication identifier")
            }
            Self::AssetNotFound(detail) => {
                tracing::warn!("Asset not found: {}", detail);
                (StatusCode::NOT_FOUND, "asset not found")
            }
            Self::LoadFailed(detail) => {
                tracing::error!("Publication load failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to load publication")
            }
            Self::ReadFailed(detail) => {
                tracing::error!("Asset read failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to read asset")
            }
            Self::ShellUnavailable(detail) => {
                tracing::error!("{}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "viewer asset unavailable")
            }
            Self::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        };

        (status, message).into_response()
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Decode(e) => Self::BadIdentifier(e.to_string()),
            ResolveError::Parse(e) => Self::LoadFailed(e.to_string()),
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(asset) => Self::AssetNotFound(asset),
            other => Self::ReadFailed(other.to_string()),
        }
    }
}

impl From<StaticAssetError> for AppError {
    fn from(err: StaticAssetError) -> Self {
        Self::ShellUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ParseError};

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (AppError::from(ResolveError::Decode(DecodeError::Empty)), StatusCode::BAD_REQUEST),
            (
                AppError::from(ResolveError::from(ParseError::MissingEntry("x".to_string()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::from(FetchError::NotFound("a.css".to_string())), StatusCode::NOT_FOUND),
            (
                AppError::from(FetchError::Task("cancelled".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::from(StaticAssetError("sw.js")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_bodies_do_not_leak_details() {
        let response = AppError::from(ResolveError::from(ParseError::Malformed {
            document: "/secret/path/content.opf".to_string(),
            reason: "no manifest".to_string(),
        }))
        .into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"failed to load publication");
    }

    #[test]
    fn test_request_host_prefers_header() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "http://authority.example/x".parse().unwrap();
        assert_eq!(request_host(&headers, &uri), "authority.example");

        headers.insert(header::HOST, HeaderValue::from_static("localhost:4000"));
        assert_eq!(request_host(&headers, &uri), "localhost:4000");

        let relative: Uri = "/x".parse().unwrap();
        assert_eq!(request_host(&HeaderMap::new(), &relative), "localhost");
    }
}

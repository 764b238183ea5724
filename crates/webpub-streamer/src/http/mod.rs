//! HTTP server implementation using axum.

use crate::error::ServerError;
use crate::server::AppState;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod range;

/// Create HTTP router with all endpoints.
///
/// Exact paths are matched before the asset wildcard, so `manifest.json` and
/// `index.html` never reach the asset handler. A panicking handler answers 500
/// instead of dropping the connection.
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = state.request_timeout();

    Router::new()
        .route("/viewer.js", get(handlers::handle_viewer))
        .route("/sw.js", get(handlers::handle_service_worker))
        .route("/{identifier}/", get(handlers::handle_index))
        .route("/{identifier}/index.html", get(handlers::handle_index))
        .route(
            "/{identifier}/manifest.json",
            get(handlers::handle_manifest).layer(CompressionLayer::new()),
        )
        .route("/{identifier}/{*asset}", get(handlers::handle_asset))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve requests on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `ServerError` if the server encounters a runtime error.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("HTTP server listening on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Shutdown(format!("HTTP server error: {e}")))?;

    Ok(())
}

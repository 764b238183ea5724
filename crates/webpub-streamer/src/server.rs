//! Server state management and orchestration.
//!
//! Manages the state shared by every request handler (publication cache,
//! asset fetcher, viewer shell) and the listener lifecycle.

use crate::cache::PublicationCache;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fetcher::{AssetFetcher, EpubFetcher};
use crate::identifier;
use crate::parser::{EpubParser, PublicationParser};
use crate::static_assets::StaticAssets;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Parsed publications, loaded on demand
    cache: PublicationCache,

    /// Asset extraction
    fetcher: Arc<dyn AssetFetcher>,

    /// Viewer shell files (loaded once at startup)
    static_assets: Arc<StaticAssets>,

    /// Per-request deadline
    request_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cache", &self.cache)
            .field("static_assets", &self.static_assets)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create application state with the EPUB parser and fetcher.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_collaborators(
            Arc::new(EpubParser),
            Arc::new(EpubFetcher),
            StaticAssets::load(&config.public_dir),
            config.request_timeout(),
        )
    }

    /// Create application state from explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        parser: Arc<dyn PublicationParser>,
        fetcher: Arc<dyn AssetFetcher>,
        static_assets: StaticAssets,
        request_timeout: Duration,
    ) -> Self {
        Self {
            cache: PublicationCache::new(parser),
            fetcher,
            static_assets: Arc::new(static_assets),
            request_timeout,
        }
    }

    /// Get the publication cache.
    #[must_use]
    pub const fn cache(&self) -> &PublicationCache {
        &self.cache
    }

    /// Get the asset fetcher.
    #[must_use]
    pub const fn fetcher(&self) -> &Arc<dyn AssetFetcher> {
        &self.fetcher
    }

    /// Get the viewer shell files.
    #[must_use]
    pub const fn static_assets(&self) -> &Arc<StaticAssets> {
        &self.static_assets
    }

    /// Get the per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Host and port to print for a bound address.
///
/// Wildcard addresses are not reachable as such, so they are announced as
/// `localhost`.
#[must_use]
pub fn announce_host(addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("localhost:{}", addr.port())
    } else {
        addr.to_string()
    }
}

/// Server orchestration.
pub struct Server {
    /// Shared application state
    state: Arc<AppState>,
    /// Server configuration
    config: ServerConfig,
    /// Bound listener
    listener: TcpListener,
    /// Address the listener is bound to
    local_addr: SocketAddr,
}

impl Server {
    /// Validate configuration and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the configuration is invalid or the listener
    /// cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let state = AppState::new(&config);
        Self::bind_with_state(config, state).await
    }

    /// Bind the listener for prepared state.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the listener cannot be bound.
    pub async fn bind_with_state(config: ServerConfig, state: AppState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind,
                source,
            })?;

        tracing::info!("HTTP server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(state),
            config,
            listener,
            local_addr,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Manifest URL of the configured book.
    #[must_use]
    pub fn manifest_url(&self) -> String {
        identifier::manifest_url(
            &announce_host(self.local_addr),
            &self.config.book_identifier(),
        )
    }

    /// Get shared application state.
    #[must_use]
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Announce the manifest URL and serve until interrupted.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if preloading fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), ServerError> {
        let manifest_url = self.manifest_url();

        if self.config.preload {
            self.state
                .cache()
                .resolve(
                    &self.config.book_identifier(),
                    &announce_host(self.local_addr),
                )
                .await?;
        }

        println!("{manifest_url}");

        crate::http::serve(self.listener, self.state, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server");
}

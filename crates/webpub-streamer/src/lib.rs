//! Streaming web publication server.
//!
//! This crate serves local EPUB files to a browser-based reader as Readium
//! web publications. A publication is addressed by an opaque identifier
//! derived from its file path; the first request for an identifier parses the
//! book, later requests are answered from an in-memory cache.
//!
//! # Architecture
//!
//! - `identifier`: path <-> URL-safe identifier encoding
//! - `publication`: the web publication manifest model
//! - `parser`: EPUB parsing into a `Publication`
//! - `fetcher`: extraction of individual assets
//! - `cache`: on-demand cache with load coalescing
//! - `http`: router, handlers and byte-range support
//! - `static_assets`: viewer shell files
//! - `config`: configuration loading and validation
//! - `server`: listener lifecycle
//!
//! # Example
//!
//! ```no_run
//! use webpub_streamer::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::from_args();
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod identifier;
pub mod parser;
pub mod publication;
pub mod server;
pub mod static_assets;

pub use cache::{CacheEntry, PublicationCache};
pub use config::ServerConfig;
pub use error::{ConfigError, DecodeError, FetchError, ParseError, ResolveError, ServerError};
pub use fetcher::{AssetFetcher, AssetSource, EpubFetcher};
pub use parser::{EpubParser, PublicationParser};
pub use publication::{Link, Metadata, Publication};
pub use server::{AppState, Server};
pub use static_assets::StaticAssets;

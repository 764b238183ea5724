//! Server configuration management.
//!
//! This module handles loading and validating server configuration from CLI
//! arguments and environment variables.
//!
//! # Configuration Sources
//!
//! Configuration can be provided via:
//! - CLI arguments (`--bind`, `--public-dir`, etc.)
//! - Environment variables (`WEBPUB_STREAMER_BIND`, etc.)
//! - Default values
//!
//! # Example
//!
//! ```no_run
//! use webpub_streamer::ServerConfig;
//!
//! let config = ServerConfig::from_args();
//! config.validate().expect("Invalid configuration");
//!
//! println!("Serving {} on {}", config.book.display(), config.bind);
//! ```

use crate::error::ConfigError;
use crate::identifier;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from CLI args and environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "webpub-streamer",
    about = "Serve a local EPUB as a streamable web publication",
    version
)]
pub struct ServerConfig {
    /// EPUB file whose manifest URL is announced on startup
    #[arg(env = "WEBPUB_STREAMER_BOOK")]
    pub book: PathBuf,

    /// Listener address (port 0 picks a free port)
    #[arg(long, env = "WEBPUB_STREAMER_BIND", default_value = "127.0.0.1:0")]
    pub bind: SocketAddr,

    /// Directory holding viewer.js, sw.js and index.html
    #[arg(long, env = "WEBPUB_STREAMER_PUBLIC_DIR", default_value = "./public")]
    pub public_dir: PathBuf,

    /// Per-request deadline in seconds
    #[arg(long, env = "WEBPUB_STREAMER_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Parse the book before announcing its URL
    #[arg(long, env = "WEBPUB_STREAMER_PRELOAD")]
    pub preload: bool,
}

impl ServerConfig {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Configuration for serving `book` with default settings.
    #[must_use]
    pub fn for_book(book: impl Into<PathBuf>) -> Self {
        Self {
            book: book.into(),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_dir: PathBuf::from("./public"),
            request_timeout_secs: 10,
            preload: false,
        }
    }

    /// Per-request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Identifier of the announced book.
    #[must_use]
    pub fn book_identifier(&self) -> String {
        identifier::encode(&self.book)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The book file doesn't exist
    /// - The request timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.book.is_file() {
            return Err(ConfigError::BookNotFound(self.book.clone()));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }

        Ok(())
    }
}

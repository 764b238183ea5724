//! webpub-streamer binary entry point.
//!
//! Parses arguments, initializes logging on stderr, binds the listener and
//! prints the manifest URL of the given book on stdout.

use anyhow::Result;
use webpub_streamer::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from_args();

    tracing::info!(
        "Configuration loaded: bind={}, book={:?}, public_dir={:?}",
        config.bind,
        config.book,
        config.public_dir
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}

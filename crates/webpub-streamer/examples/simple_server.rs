//! Simple streaming server example.
//!
//! Writes a one-chapter EPUB to a temporary directory and serves it with an
//! inline viewer shell.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example simple_server
//! ```
//!
//! Then test with the printed manifest URL:
//! ```bash
//! curl http://127.0.0.1:8080/<identifier>/manifest.json
//! curl -H 'Range: bytes=0-15' http://127.0.0.1:8080/<identifier>/chapter.xhtml
//! ```

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use webpub_streamer::{AppState, EpubFetcher, EpubParser, Server, ServerConfig, StaticAssets};
use zip::write::SimpleFileOptions;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><link rel="manifest" href="{{manifest}}"></head>
  <body><script src="/viewer.js"></script></body>
</html>"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let dir = tempfile::tempdir()?;
    let book = dir.path().join("sample.epub");

    let mut zip = zip::ZipWriter::new(std::fs::File::create(&book)?);
    let options = SimpleFileOptions::default();
    zip.start_file("META-INF/container.xml", options)?;
    zip.write_all(
        br#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#,
    )?;
    zip.start_file("content.opf", options)?;
    zip.write_all(
        br#"<package version="3.0">
  <metadata><dc:title>Sample</dc:title></metadata>
  <manifest><item id="c1" href="chapter.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#,
    )?;
    zip.start_file("chapter.xhtml", options)?;
    zip.write_all(b"<html><body><h1>Hello, reader</h1></body></html>")?;
    zip.finish()?;

    let mut config = ServerConfig::for_book(&book);
    config.bind = "127.0.0.1:8080".parse()?;
    config.preload = true;

    let state = AppState::with_collaborators(
        Arc::new(EpubParser),
        Arc::new(EpubFetcher),
        StaticAssets::from_parts(Some("console.log('viewer');"), Some(""), Some(INDEX_HTML)),
        config.request_timeout(),
    );

    let server = Server::bind_with_state(config, state).await?;
    server.run().await?;

    Ok(())
}

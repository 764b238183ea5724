//! Asset fetching.
//!
//! [`AssetFetcher`] turns a publication plus an asset path into a seekable
//! byte source and a media type. [`EpubFetcher`] serves the resources an
//! [`EpubParser`](crate::parser::EpubParser) publication lists.

use crate::error::FetchError;
use crate::publication::Publication;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use zip::ZipArchive;

/// Fallback media type for assets whose type cannot be determined.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// A readable, seekable byte source that can move to a blocking worker.
pub trait AssetReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> AssetReader for T {}

/// Result of fetching an asset.
pub struct AssetSource {
    /// Asset content
    pub reader: Box<dyn AssetReader>,
    /// Total length of the content in bytes
    pub length: u64,
    /// Media type to announce in `Content-Type`
    pub media_type: String,
}

impl std::fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetSource")
            .field("length", &self.length)
            .field("media_type", &self.media_type)
            .finish_non_exhaustive()
    }
}

impl AssetSource {
    /// Wrap an in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            length: bytes.len() as u64,
            reader: Box::new(Cursor::new(bytes)),
            media_type: media_type.into(),
        }
    }
}

/// Extracts individual assets from a parsed publication.
///
/// Implementations are called from a blocking worker thread and may perform
/// synchronous I/O.
pub trait AssetFetcher: Send + Sync {
    /// Fetch `asset`, a path relative to the publication root.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::NotFound` if the publication has no such asset, or
    /// another `FetchError` if reading it fails.
    fn fetch(&self, publication: &Publication, asset: &str) -> Result<AssetSource, FetchError>;
}

/// Fetcher for publications produced by the EPUB parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubFetcher;

impl AssetFetcher for EpubFetcher {
    fn fetch(&self, publication: &Publication, asset: &str) -> Result<AssetSource, FetchError> {
        if asset.starts_with("META-INF/") {
            return Err(FetchError::NotFound(asset.to_string()));
        }

        let link = publication
            .find_resource(asset)
            .ok_or_else(|| FetchError::NotFound(asset.to_string()))?;
        let source = publication
            .source
            .as_deref()
            .ok_or_else(|| FetchError::NotFound(asset.to_string()))?;

        let mut archive = ZipArchive::new(BufReader::new(File::open(source)?))?;
        let mut entry = match archive.by_name(asset) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(FetchError::NotFound(asset.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry.read_to_end(&mut bytes)?;

        let media_type = link
            .media_type
            .clone()
            .unwrap_or_else(|| guess_media_type(asset).to_string());

        Ok(AssetSource::from_bytes(bytes, media_type))
    }
}

/// Guess a media type from a file extension.
#[must_use]
pub fn guess_media_type(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("xhtml" | "xht") => "application/xhtml+xml",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("ncx") => "application/x-dtbncx+xml",
        Some("opf") => "application/oebps-package+xml",
        Some("xml") => "application/xml",
        Some("smil") => "application/smil+xml",
        Some("svg") => "image/svg+xml",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("otf") => "font/otf",
        Some("ttf") => "font/ttf",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("mp3") => "audio/mpeg",
        Some("m4a" | "mp4a") => "audio/mp4",
        Some("ogg" | "oga") => "audio/ogg",
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("txt") => "text/plain",
        _ => DEFAULT_MEDIA_TYPE,
    }
}

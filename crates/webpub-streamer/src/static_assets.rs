//! Viewer shell files.
//!
//! `viewer.js`, `sw.js` and the `index.html` template are read once at
//! startup and served from memory. A file that is missing at startup stays
//! missing; its route answers with a server error.

use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

/// Placeholder in `index.html` replaced with the manifest path.
pub const MANIFEST_PLACEHOLDER: &str = "{{manifest}}";

/// A shell file that was not available at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Viewer asset unavailable: {0}")]
pub struct StaticAssetError(pub &'static str);

/// In-memory copies of the viewer shell files.
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    viewer: Option<Bytes>,
    service_worker: Option<Bytes>,
    index_template: Option<String>,
}

impl StaticAssets {
    /// Load shell files from `dir`, logging any that are missing.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let assets = Self {
            viewer: read_file(dir, "viewer.js").map(Bytes::from),
            service_worker: read_file(dir, "sw.js").map(Bytes::from),
            index_template: read_file(dir, "index.html")
                .and_then(|bytes| match String::from_utf8(bytes) {
                    Ok(template) => Some(template),
                    Err(_) => {
                        tracing::warn!("index.html in {:?} is not valid UTF-8", dir);
                        None
                    }
                }),
        };

        tracing::info!(
            "Viewer shell from {:?}: viewer.js={}, sw.js={}, index.html={}",
            dir,
            assets.viewer.is_some(),
            assets.service_worker.is_some(),
            assets.index_template.is_some()
        );

        assets
    }

    /// Build from in-memory contents.
    #[must_use]
    pub fn from_parts(
        viewer: Option<&str>,
        service_worker: Option<&str>,
        index_template: Option<&str>,
    ) -> Self {
        Self {
            viewer: viewer.map(|s| Bytes::copy_from_slice(s.as_bytes())),
            service_worker: service_worker.map(|s| Bytes::copy_from_slice(s.as_bytes())),
            index_template: index_template.map(str::to_string),
        }
    }

    /// Contents of `viewer.js`.
    pub fn viewer(&self) -> Result<Bytes, StaticAssetError> {
        self.viewer.clone().ok_or(StaticAssetError("viewer.js"))
    }

    /// Contents of `sw.js`.
    pub fn service_worker(&self) -> Result<Bytes, StaticAssetError> {
        self.service_worker.clone().ok_or(StaticAssetError("sw.js"))
    }

    /// Render the shell page for a publication.
    pub fn render_index(&self, identifier: &str) -> Result<String, StaticAssetError> {
        let template = self
            .index_template
            .as_deref()
            .ok_or(StaticAssetError("index.html"))?;
        let manifest = format!("/{identifier}/manifest.json");
        Ok(template.replace(MANIFEST_PLACEHOLDER, &escape_html(&manifest)))
    }
}

fn read_file(dir: &Path, name: &str) -> Option<Vec<u8>> {
    let path = dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!("Viewer file {:?} not loaded: {}", path, e);
            None
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

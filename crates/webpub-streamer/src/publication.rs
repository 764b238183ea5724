//! Web publication manifest model.
//!
//! A [`Publication`] is what the parser produces and what the manifest
//! endpoint serializes. Field names follow the Readium Web Publication
//! Manifest so that existing reader front ends can consume it directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// JSON-LD context of a web publication manifest.
pub const WEBPUB_CONTEXT: &str = "https://readium.org/webpub-manifest/context.jsonld";

/// Media type of the manifest document itself.
pub const WEBPUB_MEDIA_TYPE: &str = "application/webpub+json";

/// A parsed publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// JSON-LD context
    #[serde(rename = "@context")]
    pub context: String,

    /// Descriptive metadata
    pub metadata: Metadata,

    /// Publication-level links (at least the `self` link)
    pub links: Vec<Link>,

    /// Resources in reading order
    #[serde(rename = "readingOrder")]
    pub reading_order: Vec<Link>,

    /// Every other resource needed to render the publication
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Link>,

    /// Archive the publication was parsed from, for the asset fetcher
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Descriptive metadata of a publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Schema.org type, always `http://schema.org/Book` for EPUB
    #[serde(rename = "@type")]
    pub kind: String,

    /// Unique identifier declared by the publication
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identifier: String,

    /// Title
    pub title: String,

    /// Authors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<String>,

    /// Language codes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub language: Vec<String>,

    /// Publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Last modification date as declared by the package document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A link to a resource of the publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Target, relative to the manifest for publication resources
    pub href: String,

    /// Media type of the target
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Relation of the target to the publication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,

    /// Human readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Package document properties of the item (e.g. `nav`, `scripted`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

impl Link {
    /// Create a link with an href and media type.
    #[must_use]
    pub fn new(href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            media_type: Some(media_type.into()),
            ..Self::default()
        }
    }
}

impl Publication {
    /// Create an empty publication whose `self` link points at `manifest_url`.
    #[must_use]
    pub fn new(manifest_url: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            context: WEBPUB_CONTEXT.to_string(),
            metadata,
            links: vec![Link {
                rel: Some("self".to_string()),
                ..Link::new(manifest_url, WEBPUB_MEDIA_TYPE)
            }],
            reading_order: Vec::new(),
            resources: Vec::new(),
            source: None,
        }
    }

    /// URL of the manifest, taken from the `self` link.
    #[must_use]
    pub fn manifest_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel.as_deref() == Some("self"))
            .map(|link| link.href.as_str())
    }

    /// Return a copy whose `self` link points at `manifest_url`.
    #[must_use]
    pub fn with_manifest_url(&self, manifest_url: &str) -> Self {
        let mut publication = self.clone();
        match publication
            .links
            .iter_mut()
            .find(|link| link.rel.as_deref() == Some("self"))
        {
            Some(link) => manifest_url.clone_into(&mut link.href),
            None => publication.links.insert(
                0,
                Link {
                    rel: Some("self".to_string()),
                    ..Link::new(manifest_url, WEBPUB_MEDIA_TYPE)
                },
            ),
        }
        publication
    }

    /// Find a publication resource by href, searching the reading order first.
    #[must_use]
    pub fn find_resource(&self, href: &str) -> Option<&Link> {
        self.reading_order
            .iter()
            .chain(self.resources.iter())
            .find(|link| link.href == href)
    }
}

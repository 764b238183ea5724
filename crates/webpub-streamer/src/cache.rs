//! On-demand publication cache.
//!
//! Maps identifiers to parsed publications, parsing each publication the first
//! time it is requested. Concurrent first requests for the same identifier
//! share a single parse: the first caller registers an in-flight load under
//! the lock, later callers await that same load. The lock guards only map
//! operations and is never held while parsing.
//!
//! Entries are never evicted. The server is a single-session local tool, so
//! the cache is bounded by the number of books opened during that session.

use crate::error::{ParseError, ResolveError};
use crate::identifier;
use crate::parser::PublicationParser;
use crate::publication::Publication;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// A parsed publication and when it was loaded.
#[derive(Debug)]
pub struct CacheEntry {
    identifier: String,
    publication: Arc<Publication>,
    loaded_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Identifier the entry is stored under.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The parsed publication.
    #[must_use]
    pub const fn publication(&self) -> &Arc<Publication> {
        &self.publication
    }

    /// When the publication was parsed.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, ResolveError>>>;

#[derive(Default)]
struct Slots {
    entries: HashMap<String, Arc<CacheEntry>>,
    loading: HashMap<String, SharedLoad>,
}

struct Inner {
    slots: Mutex<Slots>,
    parser: Arc<dyn PublicationParser>,
}

/// Shared, cloneable handle to the publication cache.
#[derive(Clone)]
pub struct PublicationCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PublicationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.inner.slots.lock();
        f.debug_struct("PublicationCache")
            .field("entries", &slots.entries.len())
            .field("loading", &slots.loading.len())
            .finish()
    }
}

impl PublicationCache {
    /// Create an empty cache that parses publications with `parser`.
    #[must_use]
    pub fn new(parser: Arc<dyn PublicationParser>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Slots::default()),
                parser,
            }),
        }
    }

    /// Resolve an identifier to its cache entry, parsing the publication on
    /// first access.
    ///
    /// `host` is the authority the client used to reach the server; it is
    /// only used to build the manifest URL when the publication is parsed.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Decode` if the identifier is not a valid encoded
    /// path, or `ResolveError::Parse` if the publication cannot be parsed.
    /// Failed loads are not cached.
    pub async fn resolve(
        &self,
        identifier: &str,
        host: &str,
    ) -> Result<Arc<CacheEntry>, ResolveError> {
        let path = identifier::decode(identifier)?;

        let load = {
            let mut slots = self.inner.slots.lock();
            if let Some(entry) = slots.entries.get(identifier) {
                return Ok(Arc::clone(entry));
            }

            if let Some(load) = slots.loading.get(identifier) {
                tracing::debug!("Waiting for in-flight load of {}", identifier);
                load.clone()
            } else {
                let manifest_url = identifier::manifest_url(host, identifier);
                let task = tokio::spawn(load_publication(
                    Arc::clone(&self.inner),
                    identifier.to_string(),
                    path,
                    manifest_url,
                ));
                let load = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(ParseError::Task(format!("load task failed: {e}")).into())
                    })
                }
                .boxed()
                .shared();
                slots.loading.insert(identifier.to_string(), load.clone());
                load
            }
        };

        load.await
    }

    /// Look up an already loaded entry without triggering a parse.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Arc<CacheEntry>> {
        self.inner.slots.lock().entries.get(identifier).cloned()
    }

    /// Number of loaded publications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.lock().entries.len()
    }

    /// Whether no publication has been loaded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads currently in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.slots.lock().loading.len()
    }

    /// Identifiers of all loaded publications, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> =
            self.inner.slots.lock().entries.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }
}

/// Parse a publication and record the outcome.
///
/// Runs as its own task so that the slot bookkeeping happens exactly once,
/// even if every request waiting on it has gone away.
async fn load_publication(
    inner: Arc<Inner>,
    identifier: String,
    path: PathBuf,
    manifest_url: String,
) -> Result<Arc<CacheEntry>, ResolveError> {
    let started = Instant::now();
    tracing::info!("Loading publication {:?}", path);

    let parser = Arc::clone(&inner.parser);
    let parsed = tokio::task::spawn_blocking(move || parser.parse(&path, &manifest_url))
        .await
        .unwrap_or_else(|e| Err(ParseError::Task(e.to_string())));

    let mut slots = inner.slots.lock();
    slots.loading.remove(&identifier);

    match parsed {
        Ok(publication) => {
            tracing::info!(
                "Loaded publication '{}' in {:?}",
                publication.metadata.title,
                started.elapsed()
            );
            let entry = Arc::new(CacheEntry {
                identifier: identifier.clone(),
                publication: Arc::new(publication),
                loaded_at: Utc::now(),
            });
            slots.entries.insert(identifier, Arc::clone(&entry));
            Ok(entry)
        }
        Err(e) => {
            tracing::warn!("Failed to load publication {}: {}", identifier, e);
            Err(e.into())
        }
    }
}

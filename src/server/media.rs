//! Content-addressed media cache
//!
//! Remote images returned by the agent are fetched once and re-served from
//! this node under `<base>/image/<hash>`, where `hash` is the hex SHA-256 of
//! the source URL. Entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Cache key of a source URL
pub fn media_hash(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

// ─────────────────────────────────────────────────────────────────
// Fetching
// ─────────────────────────────────────────────────────────────────

/// Downloads a remote asset
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Plain HTTP GET; non-2xx statuses are failures
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::media_fetch(url, e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| Error::media_fetch(url, e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Media Cache
// ─────────────────────────────────────────────────────────────────

pub struct MediaCache {
    base_url: String,
    fetcher: Arc<dyn MediaFetcher>,
    entries: RwLock<HashMap<String, Bytes>>,
    /// One async lock per hash so unrelated fetches never wait on each other
    fetch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MediaCache {
    /// `base_url` is this node's `http://<ip>:<port>`
    pub fn new(base_url: impl Into<String>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            base_url: base_url.into(),
            fetcher,
            entries: RwLock::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Local URL of a cached entry
    pub fn handle(&self, hash: &str) -> String {
        format!("{}/image/{}", self.base_url.trim_end_matches('/'), hash)
    }

    /// Rewrite a remote URL into a local handle, fetching it on first use
    ///
    /// `None` stays `None` and fetches nothing.
    pub async fn resolve(&self, url: Option<&str>) -> Result<Option<String>> {
        match url {
            Some(url) => {
                let hash = self.store(url).await?;
                Ok(Some(self.handle(&hash)))
            }
            None => Ok(None),
        }
    }

    /// Make sure `url` is cached and return its hash
    ///
    /// Concurrent calls for the same URL fetch it once; a failed fetch stores
    /// nothing and the next call tries again.
    pub async fn store(&self, url: &str) -> Result<String> {
        let hash = media_hash(url);
        if self.contains(&hash) {
            return Ok(hash);
        }

        let lock = self.fetch_lock(&hash);
        let _guard = lock.lock().await;
        if self.contains(&hash) {
            return Ok(hash);
        }

        debug!(%url, %hash, "Fetching media");
        let bytes = self.fetcher.fetch(url).await?;
        info!(%hash, size = bytes.len(), "Media cached");
        self.entries.write().insert(hash.clone(), bytes);
        Ok(hash)
    }

    pub fn get(&self, hash: &str) -> Option<Bytes> {
        self.entries.read().get(hash).cloned()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn fetch_lock(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.fetch_locks.lock().entry(hash.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `image:<url>` after a short delay and counts calls
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MediaFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(Error::media_fetch(url, "404 Not Found"));
            }
            Ok(Bytes::from(format!("image:{}", url)))
        }
    }

    fn cache(fetcher: Arc<CountingFetcher>) -> MediaCache {
        MediaCache::new("http://10.0.0.1:8000", fetcher)
    }

    #[test]
    fn test_media_hash_is_sha256_hex() {
        assert_eq!(
            media_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_none_resolves_to_none() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = cache(fetcher.clone());
        assert_eq!(cache.resolve(None).await.unwrap(), None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_rewrites_and_caches() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = cache(fetcher.clone());
        let url = "https://cdn.example/portrait.png";

        let handle = cache.resolve(Some(url)).await.unwrap().unwrap();
        assert_eq!(handle, format!("http://10.0.0.1:8000/image/{}", media_hash(url)));
        assert_eq!(cache.get(&media_hash(url)).unwrap(), Bytes::from(format!("image:{}", url)));

        cache.resolve(Some(url)).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_fetches_once() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = Arc::new(cache(fetcher.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve(Some("https://cdn.example/a.png")).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_stores_nothing() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..Default::default()
        });
        let cache = cache(fetcher.clone());

        assert!(cache.resolve(Some("https://cdn.example/missing.png")).await.is_err());
        assert!(cache.is_empty());

        // Not memoized: the next call tries again
        assert!(cache.resolve(Some("https://cdn.example/missing.png")).await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}

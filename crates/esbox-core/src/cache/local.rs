use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::warn;

/// Process-local response cache keyed by request path.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl LocalCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, request: &str) -> Option<Bytes> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(request).cloned())
    }

    fn put(&self, request: &str, data: Bytes) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(request.to_string(), data);
        }
    }

    /// Return `transform` applied to the cached bytes for `request`, fetching
    /// and storing them first on a miss.
    ///
    /// A transform failure over cached bytes falls through to a live fetch.
    pub async fn with_data<T, E, F, Fut, X>(
        &self,
        request: &str,
        fetch: F,
        transform: X,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        X: Fn(&[u8]) -> Result<T, E>,
        E: std::fmt::Display,
    {
        if let Some(cached) = self.get(request) {
            match transform(&cached) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(request, error = %e, "local cache entry unusable, refetching");
                }
            }
        }

        let data = fetch().await?;
        self.put(request, data.clone());
        transform(&data)
    }

    /// True iff a non-empty entry exists for `request`.
    #[must_use]
    pub fn contains(&self, request: &str) -> bool {
        self.get(request).is_some_and(|data| !data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn utf8(data: &[u8]) -> Result<String, String> {
        String::from_utf8(data.to_vec()).map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let cache = LocalCache::new();
        let fetches = AtomicUsize::new(0);

        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Bytes::from_static(b"data"))
        };

        let first = cache.with_data("/v2/deps/x", fetch, utf8).await.unwrap();
        assert_eq!(first, "data");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Bytes::from_static(b"other"))
        };
        let second = cache.with_data("/v2/deps/x", fetch, utf8).await.unwrap();
        assert_eq!(second, "data");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transform_failure_refetches() {
        let cache = LocalCache::new();
        // Seed an entry the transform will reject.
        cache.put("/v2/deps/y", Bytes::from_static(&[0xFF]));

        let value = cache
            .with_data(
                "/v2/deps/y",
                || async { Ok::<_, String>(Bytes::from_static(b"fresh")) },
                utf8,
            )
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        // The fresh bytes replaced the corrupted entry.
        assert_eq!(cache.get("/v2/deps/y").unwrap(), Bytes::from_static(b"fresh"));
    }

    #[tokio::test]
    async fn test_contains_requires_non_empty() {
        let cache = LocalCache::new();
        cache.put("/empty", Bytes::new());
        cache.put("/full", Bytes::from_static(b"x"));

        assert!(!cache.contains("/empty"));
        assert!(cache.contains("/full"));
        assert!(!cache.contains("/missing"));

        let _: Result<Vec<u8>, Infallible> = cache
            .with_data("/full", || async { Ok(Bytes::new()) }, |d| Ok(d.to_vec()))
            .await;
    }
}

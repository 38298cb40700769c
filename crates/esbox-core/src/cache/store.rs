use crate::paths;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use esbox_util::diskio::atomic_write;
use esbox_util::hash::blake3_hex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Database directory name.
pub const DB_NAME: &str = "esbuild-dependencies-cache";

/// Database schema version. Bump when changing the entry format.
pub const DB_VERSION: u32 = 1;

/// Object stores within the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreName {
    /// General entries; records carry a `last_used` stamp.
    Cache,
    /// Lockfile snapshots.
    Lockfile,
    /// CDN responses keyed by request path. The installer reads this one.
    SandpackCdn,
}

impl StoreName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Lockfile => "lockfile",
            Self::SandpackCdn => "sandpack-cdn",
        }
    }
}

const ALL_STORES: [StoreName; 3] = [StoreName::Cache, StoreName::Lockfile, StoreName::SandpackCdn];

/// One persisted record.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    request: String,
    /// Raw response bytes, base64-encoded.
    data: String,
    last_used: u64,
}

/// Disk-backed key/value database for CDN responses.
///
/// Entries live under `<root>/esbuild-dependencies-cache/v1/<store>/`, one
/// JSON file per key named by the BLAKE3 digest of the key. Writes go
/// through a temp file and rename; read or write failures degrade to cache
/// misses rather than propagating.
#[derive(Debug, Clone)]
pub struct CacheDb {
    root: PathBuf,
}

impl CacheDb {
    /// Open (creating as needed) a database under `base`.
    ///
    /// # Errors
    /// Returns an error if the store directories cannot be created.
    pub fn open(base: &Path) -> io::Result<Self> {
        let root = base.join(DB_NAME).join(format!("v{DB_VERSION}"));
        for store in ALL_STORES {
            std::fs::create_dir_all(root.join(store.as_str()))?;
        }
        Ok(Self { root })
    }

    /// Open the database under the platform cache directory.
    pub fn open_default() -> io::Result<Self> {
        Self::open(&paths::cache_dir())
    }

    fn entry_path(&self, store: StoreName, key: &str) -> PathBuf {
        self.root
            .join(store.as_str())
            .join(format!("{}.json", blake3_hex(key.as_bytes())))
    }

    /// Read the raw bytes stored for `key`, if any.
    #[must_use]
    pub fn get(&self, store: StoreName, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(store, key);
        let text = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                return None;
            }
        };
        if entry.request != key {
            // Digest collision or a hand-edited file; treat as a miss.
            return None;
        }
        BASE64.decode(entry.data).ok()
    }

    /// Persist `data` for `key`. Failures are logged, not propagated.
    pub fn put(&self, store: StoreName, key: &str, data: &[u8]) {
        let entry = CacheEntry {
            request: key.to_string(),
            data: BASE64.encode(data),
            last_used: now_secs(),
        };
        let Ok(json) = serde_json::to_vec(&entry) else {
            return;
        };
        if let Err(e) = atomic_write(&self.entry_path(store, key), &json) {
            warn!(key, error = %e, "failed to persist cache entry");
        }
    }

    /// True iff a record with non-empty data exists for `key` in the CDN store.
    #[must_use]
    pub fn is_cached(&self, key: &str) -> bool {
        self.get(StoreName::SandpackCdn, key)
            .is_some_and(|data| !data.is_empty())
    }

    /// Return `transform` over the bytes cached for `request` in the CDN
    /// store, fetching and persisting them first on a miss.
    ///
    /// A transform failure over cached bytes degrades to a live fetch.
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
        if let Some(cached) = self.get(StoreName::SandpackCdn, request) {
            match transform(&cached) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(request, error = %e, "persistent cache entry unusable, refetching");
                }
            }
        }

        let data = fetch().await?;
        self.put(StoreName::SandpackCdn, request, &data);
        transform(&data)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();

        db.put(StoreName::SandpackCdn, "/v2/mod/abc", b"payload");
        assert_eq!(
            db.get(StoreName::SandpackCdn, "/v2/mod/abc").unwrap(),
            b"payload"
        );
        assert!(db.is_cached("/v2/mod/abc"));
    }

    #[test]
    fn test_stores_are_isolated() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();

        db.put(StoreName::Lockfile, "key", b"lock");
        assert!(db.get(StoreName::SandpackCdn, "key").is_none());
        assert!(db.get(StoreName::Cache, "key").is_none());
        assert_eq!(db.get(StoreName::Lockfile, "key").unwrap(), b"lock");
    }

    #[test]
    fn test_empty_data_is_not_cached() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();

        db.put(StoreName::SandpackCdn, "/v2/mod/empty", b"");
        assert!(!db.is_cached("/v2/mod/empty"));
    }

    #[test]
    fn test_unreadable_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();

        let path = db.entry_path(StoreName::SandpackCdn, "/v2/mod/bad");
        std::fs::write(&path, b"not json").unwrap();
        assert!(db.get(StoreName::SandpackCdn, "/v2/mod/bad").is_none());
    }

    #[tokio::test]
    async fn test_with_data_fetches_once() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();

        let value = db
            .with_data(
                "/v2/mod/x",
                || async { Ok::<_, String>(Bytes::from_static(b"bytes")) },
                |d| Ok(d.len()),
            )
            .await
            .unwrap();
        assert_eq!(value, 5);

        // Second read is served from disk; a failing fetch proves it.
        let value = db
            .with_data(
                "/v2/mod/x",
                || async { Err::<Bytes, _>("network down".to_string()) },
                |d| Ok(d.len()),
            )
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_with_data_corrupt_entry_refetches() {
        let dir = tempdir().unwrap();
        let db = CacheDb::open(dir.path()).unwrap();
        db.put(StoreName::SandpackCdn, "/v2/mod/y", b"garbage");

        let value = db
            .with_data(
                "/v2/mod/y",
                || async { Ok::<_, String>(Bytes::from_static(b"good")) },
                |d| {
                    std::str::from_utf8(d)
                        .ok()
                        .filter(|s| *s == "good")
                        .map(str::to_string)
                        .ok_or_else(|| "bad payload".to_string())
                },
            )
            .await
            .unwrap();
        assert_eq!(value, "good");
    }
}

//! Preview store: in-memory per-project files plus a persistent disk cache.

use esbox_util::diskio::atomic_write;
use esbox_util::vpath;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Preview server configuration.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Hostname suffix intercepted as `<project>.<suffix>`. The compile-time
    /// default comes from `ESBOX_PREVIEW_SUFFIX` at build time.
    pub suffix: Option<String>,
    /// Root for persistent per-project caches; platform default when unset.
    pub cache_root: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            suffix: option_env!("ESBOX_PREVIEW_SUFFIX").map(str::to_string),
            cache_root: None,
        }
    }
}

/// Server-wide preview state. Owns its files independently; it never shares
/// the workers' FS.
pub struct PreviewState {
    projects: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    cache_root: PathBuf,
    suffix: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PreviewState {
    #[must_use]
    pub fn new(config: PreviewConfig) -> Self {
        let cache_root = config
            .cache_root
            .unwrap_or_else(|| esbox_core::paths::cache_dir().join("preview"));
        Self {
            projects: Mutex::new(HashMap::new()),
            cache_root,
            suffix: config.suffix,
        }
    }

    /// The configured host suffix, if any.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    fn project_cache_dir(&self, project: &str) -> PathBuf {
        self.cache_root.join(format!("esbuild-files-{project}"))
    }

    /// Replace a project's files: store in memory, clear the persistent
    /// cache for the project, and re-insert each file.
    pub fn upload(&self, project: &str, files: BTreeMap<String, String>) {
        let mut stored: HashMap<String, Vec<u8>> = HashMap::new();
        for (path, body) in files {
            stored.insert(vpath::normalize_owned(&path), body.into_bytes());
        }

        let dir = self.project_cache_dir(project);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(project, error = %e, "failed to clear preview cache");
            }
        }
        for (path, body) in &stored {
            let Some(disk_path) = safe_cache_path(&dir, path) else {
                warn!(project, path, "skipping unsafe preview path");
                continue;
            };
            if let Err(e) = atomic_write(&disk_path, body) {
                warn!(project, path, error = %e, "failed to persist preview file");
            }
        }

        debug!(project, files = stored.len(), "preview upload complete");
        lock(&self.projects).insert(project.to_string(), stored);
    }

    /// In-memory lookup only (host-suffix interception path).
    #[must_use]
    pub fn memory_lookup(&self, project: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.projects)
            .get(project)?
            .get(vpath::normalize(path))
            .cloned()
    }

    /// Lookup with persistent fallback: a disk hit repopulates the in-memory
    /// entry before returning.
    #[must_use]
    pub fn lookup(&self, project: &str, path: &str) -> Option<Vec<u8>> {
        if let Some(body) = self.memory_lookup(project, path) {
            return Some(body);
        }

        let key = vpath::normalize_owned(path);
        let disk_path = safe_cache_path(&self.project_cache_dir(project), &key)?;
        let body = std::fs::read(disk_path).ok()?;

        lock(&self.projects)
            .entry(project.to_string())
            .or_default()
            .insert(key, body.clone());
        Some(body)
    }
}

/// Resolve a file key beneath the project cache dir, rejecting traversal.
fn safe_cache_path(dir: &Path, key: &str) -> Option<PathBuf> {
    if key.is_empty() {
        return None;
    }
    let mut out = dir.to_path_buf();
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return None;
        }
        out.push(segment);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(dir: &Path) -> PreviewState {
        PreviewState::new(PreviewConfig {
            suffix: None,
            cache_root: Some(dir.to_path_buf()),
        })
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_upload_and_memory_lookup() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        state.upload("p1", files(&[("/index.html", "<html>"), ("main.js", "x")]));
        assert_eq!(state.memory_lookup("p1", "index.html").unwrap(), b"<html>");
        assert_eq!(state.memory_lookup("p1", "/main.js").unwrap(), b"x");
        assert!(state.memory_lookup("p1", "other.js").is_none());
        assert!(state.memory_lookup("p2", "index.html").is_none());
    }

    #[test]
    fn test_disk_fallback_repopulates_memory() {
        let dir = tempdir().unwrap();
        {
            let first = state(dir.path());
            first.upload("p1", files(&[("index.html", "<html>")]));
        }

        // A fresh state over the same cache root has no in-memory entries.
        let second = state(dir.path());
        assert!(second.memory_lookup("p1", "index.html").is_none());
        assert_eq!(second.lookup("p1", "index.html").unwrap(), b"<html>");
        // The disk hit warmed the in-memory map.
        assert_eq!(second.memory_lookup("p1", "index.html").unwrap(), b"<html>");
    }

    #[test]
    fn test_upload_clears_previous_cache() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        state.upload("p1", files(&[("a.js", "1")]));
        state.upload("p1", files(&[("b.js", "2")]));

        assert!(state.lookup("p1", "a.js").is_none());
        assert_eq!(state.lookup("p1", "b.js").unwrap(), b"2");
    }

    #[test]
    fn test_traversal_keys_are_rejected() {
        let dir = tempdir().unwrap();
        assert!(safe_cache_path(dir.path(), "../escape.js").is_none());
        assert!(safe_cache_path(dir.path(), "a//b.js").is_none());
        assert!(safe_cache_path(dir.path(), "ok/fine.js").is_some());
    }
}

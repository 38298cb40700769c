//! In-memory virtual file system.
//!
//! Holds project files as a flat map from normalised path to file record.
//! There are no directory entities: a path is a directory exactly when some
//! stored key extends it. Reads never fail; a missing path reads as the
//! empty string.
//!
//! Every mutation is forwarded to an optional [`FsMirror`] after it lands
//! locally, so a worker-side FS can keep an out-of-thread twin in sync.

mod mirror;

pub use mirror::{apply_op, ChannelMirror, FsMirror};

use esbox_proto::{FileRecord, FsOp, RawFiles};
use esbox_util::vpath;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default working directory for user projects.
pub const DEFAULT_CWD: &str = "/app";

/// Path of the persisted packages fingerprint.
pub const PACKAGE_HASH_PATH: &str = "/~system/package-json-hash";

/// A file system shared between concurrent tasks.
pub type SharedFs = Arc<tokio::sync::Mutex<MemFs>>;

/// In-memory file system with an optional write-through mirror.
pub struct MemFs {
    files: HashMap<String, FileRecord>,
    cwd: String,
    mirror: Option<Arc<dyn FsMirror>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFs")
            .field("files", &self.files.len())
            .field("cwd", &self.cwd)
            .field("mirror", &self.mirror.is_some())
            .finish()
    }
}

impl MemFs {
    /// Create an empty FS with the default working directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            cwd: DEFAULT_CWD.to_string(),
            mirror: None,
        }
    }

    /// Create an FS seeded from a path → text snapshot.
    #[must_use]
    pub fn from_raw_files(files: &RawFiles) -> Self {
        let mut fs = Self::new();
        for (path, contents) in files {
            fs.files.insert(
                vpath::normalize_owned(path),
                FileRecord::new(contents.clone()),
            );
        }
        fs
    }

    /// Bind a mirror; subsequent mutations are forwarded to it.
    pub fn bind_mirror(&mut self, mirror: Arc<dyn FsMirror>) {
        self.mirror = Some(mirror);
    }

    /// Wrap into a [`SharedFs`].
    #[must_use]
    pub fn into_shared(self) -> SharedFs {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn forward(&self, op: FsOp) {
        if let Some(mirror) = &self.mirror {
            mirror.apply(op);
        }
    }

    /// Current working directory (default `/app`).
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Change the working directory.
    pub fn chdir(&mut self, path: &str) {
        self.cwd = path.to_string();
        self.forward(FsOp::Chdir {
            path: path.to_string(),
        });
    }

    /// True iff `path` is a stored file key.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(vpath::normalize(path))
    }

    /// True iff some stored key extends `path` by more than one character.
    ///
    /// Directories are implied, never materialised.
    #[must_use]
    pub fn is_directory(&self, path: &str) -> bool {
        let prefix = vpath::normalize(path);
        self.files
            .keys()
            .any(|key| key.starts_with(prefix) && key.len() > prefix.len() + 1)
    }

    /// Write `contents` at `path`, preserving entry flags on an existing record.
    pub fn write_file(&mut self, path: &str, contents: &str) {
        let key = vpath::normalize_owned(path);
        match self.files.get_mut(&key) {
            Some(record) => record.contents = contents.to_string(),
            None => {
                self.files.insert(key, FileRecord::new(contents));
            }
        }
        self.forward(FsOp::WriteFile {
            path: path.to_string(),
            contents: contents.to_string(),
        });
    }

    /// Append `contents` at `path`, creating the record when absent.
    pub fn append_file(&mut self, path: &str, contents: &str) {
        let key = vpath::normalize_owned(path);
        match self.files.get_mut(&key) {
            Some(record) => record.contents.push_str(contents),
            None => {
                self.files.insert(key, FileRecord::new(contents));
            }
        }
        self.forward(FsOp::AppendFile {
            path: path.to_string(),
            contents: contents.to_string(),
        });
    }

    /// Read the contents at `path`, or the empty string when absent.
    ///
    /// Absence is indistinguishable from an empty file.
    #[must_use]
    pub fn read_file(&self, path: &str) -> String {
        self.files
            .get(vpath::normalize(path))
            .map(|record| record.contents.clone())
            .unwrap_or_default()
    }

    /// Remove the record at `path`. Removing an absent path is a no-op.
    pub fn delete_file(&mut self, path: &str) {
        self.files.remove(vpath::normalize(path));
        self.forward(FsOp::DeleteFile {
            path: path.to_string(),
        });
    }

    /// Every stored key beginning with `path`. Callers filter for immediate
    /// children when they need them.
    #[must_use]
    pub fn read_dir(&self, path: &str) -> Vec<String> {
        let prefix = vpath::normalize(path);
        let mut keys: Vec<String> = self
            .files
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Remove every record beginning with `path`.
    pub fn rmdir(&mut self, path: &str) {
        let prefix = vpath::normalize_owned(path);
        self.files.retain(|key, _| !key.starts_with(&prefix));
        self.forward(FsOp::Rmdir {
            path: path.to_string(),
        });
    }

    /// Shallow-merge each supplied record onto any existing record.
    pub fn set_files(&mut self, files: BTreeMap<String, FileRecord>) {
        let mut normalised = BTreeMap::new();
        for (path, record) in files {
            normalised.insert(vpath::normalize_owned(&path), record);
        }
        for (key, record) in &normalised {
            self.files.insert(key.clone(), record.clone());
        }
        self.forward(FsOp::SetFiles { files: normalised });
    }

    /// Snapshot of the stored files as path → text.
    #[must_use]
    pub fn raw_files(&self) -> RawFiles {
        self.files
            .iter()
            .map(|(key, record)| (key.clone(), record.contents.clone()))
            .collect()
    }

    /// Borrow the stored record at `path`.
    #[must_use]
    pub fn record(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(vpath::normalize(path))
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_round_trip_ignores_leading_slash() {
        let mut fs = MemFs::new();
        fs.write_file("/a/b", "x");

        assert_eq!(fs.read_file("a/b"), "x");
        assert_eq!(fs.read_file("/a/b"), "x");
        assert!(fs.exists("a/b"));
        assert!(fs.exists("/a/b"));
    }

    #[test]
    fn test_read_missing_is_empty_string() {
        let fs = MemFs::new();
        assert_eq!(fs.read_file("/nope"), "");
        assert!(!fs.exists("/nope"));
    }

    #[test]
    fn test_is_directory_requires_longer_key() {
        let mut fs = MemFs::new();
        fs.write_file("/app/src/index.js", "x");

        assert!(fs.is_directory("/app"));
        assert!(fs.is_directory("app/src"));
        // The full file key is not a directory.
        assert!(!fs.is_directory("/app/src/index.js"));
        assert!(!fs.is_directory("/dist"));
    }

    #[test]
    fn test_write_preserves_entry_flags() {
        let mut fs = MemFs::new();
        let mut files = BTreeMap::new();
        files.insert(
            "app/index.js".to_string(),
            FileRecord {
                contents: "old".to_string(),
                is_entry: true,
                is_js_entry: true,
            },
        );
        fs.set_files(files);

        fs.write_file("/app/index.js", "new");
        let record = fs.record("app/index.js").unwrap();
        assert_eq!(record.contents, "new");
        assert!(record.is_entry);
        assert!(record.is_js_entry);
    }

    #[test]
    fn test_append_creates_and_extends() {
        let mut fs = MemFs::new();
        fs.append_file("/log.txt", "a");
        fs.append_file("log.txt", "b");
        assert_eq!(fs.read_file("/log.txt"), "ab");
    }

    #[test]
    fn test_read_dir_returns_prefixed_keys() {
        let mut fs = MemFs::new();
        fs.write_file("/app/a.js", "1");
        fs.write_file("/app/sub/b.js", "2");
        fs.write_file("/dist/c.js", "3");

        let keys = fs.read_dir("/app");
        assert_eq!(keys, vec!["app/a.js", "app/sub/b.js"]);
    }

    #[test]
    fn test_rmdir_removes_subtree() {
        let mut fs = MemFs::new();
        fs.write_file("/app/a.js", "1");
        fs.write_file("/app/sub/b.js", "2");
        fs.write_file("/dist/c.js", "3");

        fs.rmdir("/app");
        assert!(!fs.exists("/app/a.js"));
        assert!(!fs.exists("/app/sub/b.js"));
        assert!(fs.exists("/dist/c.js"));
    }

    #[test]
    fn test_set_files_replaces_records() {
        let mut fs = MemFs::new();
        fs.write_file("/a", "old");

        let mut files = BTreeMap::new();
        files.insert(
            "/a".to_string(),
            FileRecord {
                contents: "new".to_string(),
                is_entry: true,
                is_js_entry: false,
            },
        );
        fs.set_files(files);

        let record = fs.record("a").unwrap();
        assert_eq!(record.contents, "new");
        assert!(record.is_entry);
    }

    #[test]
    fn test_default_cwd() {
        let mut fs = MemFs::new();
        assert_eq!(fs.cwd(), "/app");
        fs.chdir("/work");
        assert_eq!(fs.cwd(), "/work");
    }

    #[test]
    fn test_raw_files_uses_normalised_keys() {
        let mut fs = MemFs::new();
        fs.write_file("/app/x", "1");
        let raw = fs.raw_files();
        assert_eq!(raw.get("app/x").map(String::as_str), Some("1"));
    }
}

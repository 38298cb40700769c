//! Virtual path helpers.
//!
//! The in-memory file system stores paths with a single leading slash
//! stripped, so `/app/x` and `app/x` address the same record. Every helper
//! here operates on those normalised keys.

/// Normalise a virtual path by stripping a single leading `/`.
///
/// Only one slash is removed: `//x` normalises to `/x`, which is a distinct
/// key from `x`.
#[must_use]
pub fn normalize(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Normalise into an owned key.
#[must_use]
pub fn normalize_owned(path: &str) -> String {
    normalize(path).to_string()
}

/// Join a relative entry path under an absolute base directory.
///
/// Leading `./` and `/` segments on the entry are dropped so that
/// `join_under("/node_modules/x", "./lib/i.js")` yields
/// `/node_modules/x/lib/i.js`.
#[must_use]
pub fn join_under(base: &str, entry: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut rel = entry;
    loop {
        if let Some(rest) = rel.strip_prefix("./") {
            rel = rest;
        } else if let Some(rest) = rel.strip_prefix('/') {
            rel = rest;
        } else {
            break;
        }
    }
    format!("{base}/{rel}")
}

/// True when `key` lives underneath the directory prefix `dir`.
///
/// A key is "under" a directory when it starts with the directory name and
/// continues past a separator, so `app/x` is under `app` but `apple` is not.
#[must_use]
pub fn is_under(key: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    key.len() > dir.len() + 1 && key.starts_with(dir) && key.as_bytes()[dir.len()] == b'/'
}

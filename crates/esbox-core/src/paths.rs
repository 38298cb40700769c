use std::path::PathBuf;

/// Get the esbox cache directory.
///
/// Uses platform-appropriate locations:
/// - Linux: `$XDG_CACHE_HOME/esbox` or `~/.cache/esbox`
/// - macOS: `~/Library/Caches/esbox`
/// - Windows: `%LOCALAPPDATA%\esbox`
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".esbox-cache"),
                |p| p.join(".cache").join("esbox"),
            )
        },
        |p| p.join("esbox"),
    )
}

pub mod bundle;
pub mod install;
pub mod preview;
pub mod transform;

use esbox_proto::RawFiles;
use esbox_util::diskio::read_to_string_lossy;
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Snapshot a project directory into virtual paths under `prefix`.
///
/// Dotfiles and `node_modules` are left out; the installer owns that tree.
pub(crate) fn snapshot_dir(dir: &Path, prefix: &str) -> Result<RawFiles> {
    let mut files = RawFiles::new();

    let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        name != "node_modules" && !(name.starts_with('.') && entry.depth() > 0)
    });

    for entry in walker {
        let entry = entry.into_diagnostic()?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .into_diagnostic()?
            .to_string_lossy()
            .replace('\\', "/");
        let text = read_to_string_lossy(entry.path()).into_diagnostic()?;
        files.insert(format!("{}/{rel}", prefix.trim_end_matches('/')), text);
    }

    Ok(files)
}

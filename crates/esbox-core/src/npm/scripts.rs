//! Executable-script map derivation.

use crate::vfs::MemFs;
use esbox_util::vpath;
use serde_json::Value;
use std::collections::BTreeMap;

/// Where the script map is persisted after an install.
pub const SCRIPTS_PATH: &str = "/node_modules/.scripts.json";

/// Derive the executable entries contributed by one installed package.
///
/// A string `bin` maps the package's own name; an object `bin` maps each key;
/// otherwise a `main` field maps the package's own name. All targets resolve
/// beneath `/node_modules/<name>/`.
#[must_use]
pub fn derive_package_scripts(name: &str, manifest: &Value) -> BTreeMap<String, String> {
    let base = format!("/node_modules/{name}");
    let mut map = BTreeMap::new();

    match manifest.get("bin") {
        Some(Value::String(bin)) => {
            map.insert(name.to_string(), vpath::join_under(&base, bin));
        }
        Some(Value::Object(bins)) => {
            for (cmd, target) in bins {
                if let Some(target) = target.as_str() {
                    map.insert(cmd.clone(), vpath::join_under(&base, target));
                }
            }
        }
        _ => {
            if let Some(main) = manifest.get("main").and_then(Value::as_str) {
                map.insert(name.to_string(), vpath::join_under(&base, main));
            }
        }
    }

    map
}

/// Look up a `package.json` script as a `(command, args)` pair.
///
/// The script text is whitespace-split; the first token is the command.
#[must_use]
pub fn package_script(fs: &MemFs, script: &str) -> Option<(String, Vec<String>)> {
    let manifest = fs.read_file(&format!("{}/package.json", fs.cwd()));
    let value: Value = serde_json::from_str(&manifest).ok()?;
    let cmdline = value.get("scripts")?.get(script)?.as_str()?;

    let mut parts = cmdline.split_whitespace();
    let cmd = parts.next()?.to_string();
    Some((cmd, parts.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_bin_maps_own_name() {
        let manifest = json!({"name": "x", "bin": "./cli.js"});
        let map = derive_package_scripts("x", &manifest);
        assert_eq!(
            map.get("x").map(String::as_str),
            Some("/node_modules/x/cli.js")
        );
    }

    #[test]
    fn test_object_bin_maps_each_key() {
        let manifest = json!({"name": "tool", "bin": {"tool": "bin/a.js", "toolx": "bin/b.js"}});
        let map = derive_package_scripts("tool", &manifest);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("toolx").map(String::as_str),
            Some("/node_modules/tool/bin/b.js")
        );
    }

    #[test]
    fn test_main_fallback() {
        let manifest = json!({"name": "x", "main": "i.js"});
        let map = derive_package_scripts("x", &manifest);
        assert_eq!(
            map.get("x").map(String::as_str),
            Some("/node_modules/x/i.js")
        );
    }

    #[test]
    fn test_no_bin_no_main_is_empty() {
        let manifest = json!({"name": "x"});
        assert!(derive_package_scripts("x", &manifest).is_empty());
    }

    #[test]
    fn test_package_script_splits_command() {
        let mut fs = MemFs::new();
        fs.write_file(
            "/app/package.json",
            r#"{"scripts": {"build": "vite build --mode production"}}"#,
        );

        let (cmd, args) = package_script(&fs, "build").unwrap();
        assert_eq!(cmd, "vite");
        assert_eq!(args, vec!["build", "--mode", "production"]);
    }

    #[test]
    fn test_package_script_missing() {
        let fs = MemFs::new();
        assert!(package_script(&fs, "build").is_none());
    }
}

//! Dependency-set resolution against the registry.

use super::fingerprint::packages_hash;
use super::{wire, InstallOptions, NpmError, NpmInstaller};
use crate::progress::ProgressSink;
use crate::vfs::{SharedFs, PACKAGE_HASH_PATH};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of a resolution pass.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    /// Fingerprint of the requested dependency set.
    pub fingerprint: String,
    /// Resolved name → version map, or `None` when the fingerprint matched
    /// the one persisted on the FS and there is nothing to do.
    pub dependencies: Option<BTreeMap<String, String>>,
}

impl NpmInstaller {
    /// Resolve the project's dependency set to concrete versions.
    ///
    /// Reads `<cwd>/package.json`, merges `dependencies` and
    /// `peerDependencies` with the caller's overrides (`devDependencies` are
    /// excluded), and short-circuits when the fingerprint matches the one
    /// stored at `/~system/package-json-hash`. Otherwise the registry's
    /// `/v2/deps` endpoint is consulted through the local cache tier and the
    /// refreshed fingerprint is persisted back to the FS.
    pub async fn resolve_dependencies(
        &self,
        fs: &SharedFs,
        opts: &InstallOptions,
        progress: &ProgressSink,
    ) -> Result<ResolveOutcome, NpmError> {
        let manifest_text = {
            let fs = fs.lock().await;
            let cwd = opts.cwd.clone().unwrap_or_else(|| fs.cwd().to_string());
            fs.read_file(&format!("{}/package.json", cwd.trim_end_matches('/')))
        };

        let mut deps = manifest_dependencies(&manifest_text)?;
        for (name, version) in &opts.dependencies {
            deps.insert(name.clone(), version.clone());
        }
        let fingerprint = packages_hash(&deps);

        let stored = { fs.lock().await.read_file(PACKAGE_HASH_PATH) };
        if stored == fingerprint {
            progress.info("dependency set unchanged");
            return Ok(ResolveOutcome {
                fingerprint,
                dependencies: None,
            });
        }

        let request = format!("/v2/deps/{fingerprint}");
        let url = self.request_url(&request)?;
        let tagged = self
            .local
            .with_data(
                &request,
                || async {
                    debug!(url = %url, "resolving dependency set");
                    let response = self.http.get(url.clone()).send().await?;
                    if !response.status().is_success() {
                        return Err(NpmError::registry(format!(
                            "Registry returned status {} for '{request}'",
                            response.status()
                        )));
                    }
                    Ok(response.bytes().await?)
                },
                wire::decode_deps,
            )
            .await?;

        // The registry keys carry an `@major` tag; the authoritative result
        // is the full pass-through map with the tags stripped.
        let resolved: BTreeMap<String, String> = tagged
            .into_iter()
            .map(|(key, version)| (wire::strip_major(&key), version))
            .collect();

        {
            let mut fs = fs.lock().await;
            fs.write_file(PACKAGE_HASH_PATH, &fingerprint);
        }

        progress.info(format!("resolved {} dependencies", resolved.len()));
        Ok(ResolveOutcome {
            fingerprint,
            dependencies: Some(resolved),
        })
    }
}

/// Extract the dependency specification from manifest text.
///
/// `peerDependencies` are folded in first so plain `dependencies` win on
/// conflict. An absent or empty manifest yields an empty set.
fn manifest_dependencies(text: &str) -> Result<BTreeMap<String, String>, NpmError> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: Value = serde_json::from_str(text)
        .map_err(|e| NpmError::package_json_invalid(format!("Invalid package.json: {e}")))?;

    let mut deps = BTreeMap::new();
    for section in ["peerDependencies", "dependencies"] {
        if let Some(obj) = value.get(section).and_then(Value::as_object) {
            for (name, range) in obj {
                if let Some(range) = range.as_str() {
                    deps.insert(name.clone(), range.to_string());
                }
            }
        }
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_dependencies_excludes_dev() {
        let deps = manifest_dependencies(
            r#"{
                "dependencies": {"a": "^1.0.0"},
                "peerDependencies": {"b": "2.0.0"},
                "devDependencies": {"c": "3.0.0"}
            }"#,
        )
        .unwrap();

        assert_eq!(deps.get("a").map(String::as_str), Some("^1.0.0"));
        assert_eq!(deps.get("b").map(String::as_str), Some("2.0.0"));
        assert!(!deps.contains_key("c"));
    }

    #[test]
    fn test_dependencies_override_peers() {
        let deps = manifest_dependencies(
            r#"{
                "peerDependencies": {"react": ">=16"},
                "dependencies": {"react": "18.2.0"}
            }"#,
        )
        .unwrap();
        assert_eq!(deps.get("react").map(String::as_str), Some("18.2.0"));
    }

    #[test]
    fn test_empty_manifest_is_empty_set() {
        assert!(manifest_dependencies("").unwrap().is_empty());
        assert!(manifest_dependencies("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_manifest_errors() {
        let err = manifest_dependencies("{not json").unwrap_err();
        assert_eq!(err.code(), super::super::codes::NPM_PACKAGE_JSON_INVALID);
    }
}

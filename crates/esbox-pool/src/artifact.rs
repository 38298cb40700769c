//! Engine artifact retrieval.
//!
//! The engine ships as a WASM binary on public CDNs. Fetch policy: try the
//! primary CDN with a short abort timer, fall back to the secondary on any
//! error or non-OK status, no further retries.

use crate::error::PoolError;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Primary artifact CDN.
pub const PRIMARY_CDN: &str = "https://cdn.jsdelivr.net/npm";

/// Fallback artifact CDN.
pub const FALLBACK_CDN: &str = "https://unpkg.com";

/// npm package carrying the engine binary.
///
/// This is esbox's own engine distribution: a standalone WebAssembly build
/// of the bundler exporting the raw numeric call ABI the host drives (see
/// the `wasm` module). The engine's stock browser bundle targets a JS host
/// with its own import object and cannot be instantiated here.
pub const ENGINE_PACKAGE: &str = "esbox-engine-wasm";

/// Engine version used when the caller does not pin one.
pub const DEFAULT_ENGINE_VERSION: &str = "0.19.12";

/// Oldest engine this host drives. Earlier releases used different startup
/// APIs and artifact names and are not supported.
pub const MIN_ENGINE_VERSION: &str = "0.14.0";

/// Per-CDN abort timer.
const CDN_TIMEOUT_SECS: u64 = 5;

/// CDN subpath of the engine binary for `version`.
#[must_use]
pub fn engine_subpath(version: &str) -> String {
    format!("{ENGINE_PACKAGE}@{version}/engine.wasm")
}

/// Validate `version` against [`MIN_ENGINE_VERSION`].
pub fn check_engine_version(version: &str) -> Result<(), PoolError> {
    let requested = semver::Version::parse(version)
        .map_err(|e| PoolError::UnsupportedVersion(format!("invalid version '{version}': {e}")))?;
    let minimum = semver::Version::parse(MIN_ENGINE_VERSION)
        .map_err(|e| PoolError::Internal(format!("bad minimum version constant: {e}")))?;

    if requested < minimum {
        return Err(PoolError::UnsupportedVersion(format!(
            "engine {version} is older than the supported minimum {MIN_ENGINE_VERSION}"
        )));
    }
    Ok(())
}

/// Fetch the engine WASM binary for `version`.
pub async fn fetch_engine_wasm(version: &str) -> Result<Bytes, PoolError> {
    check_engine_version(version)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(CDN_TIMEOUT_SECS))
        .user_agent(concat!("esbox/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PoolError::Internal(format!("failed to create HTTP client: {e}")))?;

    let subpath = engine_subpath(version);

    match fetch_from(&client, PRIMARY_CDN, &subpath).await {
        Ok(bytes) => Ok(bytes),
        Err(primary_err) => {
            warn!(error = %primary_err, "primary CDN failed, trying fallback");
            fetch_from(&client, FALLBACK_CDN, &subpath)
                .await
                .map_err(|fallback_err| {
                    PoolError::ArtifactFetch(format!(
                        "primary: {primary_err}; fallback: {fallback_err}"
                    ))
                })
        }
    }
}

async fn fetch_from(client: &reqwest::Client, base: &str, subpath: &str) -> Result<Bytes, String> {
    let url = format!("{base}/{subpath}");
    debug!(url = %url, "fetching engine artifact");

    let response = client.get(&url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {} for '{url}'", response.status()));
    }
    response.bytes().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_subpath() {
        assert_eq!(
            engine_subpath("0.19.12"),
            "esbox-engine-wasm@0.19.12/engine.wasm"
        );
    }

    #[test]
    fn test_version_gate() {
        assert!(check_engine_version("0.19.12").is_ok());
        assert!(check_engine_version(MIN_ENGINE_VERSION).is_ok());
        assert!(matches!(
            check_engine_version("0.10.1"),
            Err(PoolError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            check_engine_version("not-a-version"),
            Err(PoolError::UnsupportedVersion(_))
        ));
    }
}

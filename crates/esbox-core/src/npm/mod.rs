//! Dependency installation from a content-addressed CDN.
//!
//! The installer resolves a project's dependency set to concrete versions
//! through the registry's `/v2/deps` endpoint, fetches package file maps
//! from `/v2/mod` under a bounded concurrent queue, and populates
//! `/node_modules` on a virtual file system. Resolution results are
//! memoised in a process-local tier and package payloads in the persistent
//! cache database.

mod error;
mod fingerprint;
mod install;
mod resolve;
mod scripts;
mod wire;

pub use error::{codes, NpmError};
pub use fingerprint::packages_hash;
pub use resolve::ResolveOutcome;
pub use scripts::{derive_package_scripts, package_script, SCRIPTS_PATH};
pub use wire::{
    decode_deps, decode_module_files, encode_deps, encode_module_files, module_request,
    strip_major,
};

use crate::cache::{CacheDb, LocalCache};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Global bound on simultaneous package fetches.
pub const MAX_CONCURRENT_FETCHES: usize = 10;

/// Per-package fetch timeout.
pub const FETCH_TIMEOUT_SECS: u64 = 60;

/// Attempts per module request before the install fails.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Fixed back-off between attempts (not exponential).
pub const RETRY_BACKOFF_MS: u64 = 1000;

/// Per-install options.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Working directory for the `package.json` lookup; the FS cwd when unset.
    pub cwd: Option<String>,
    /// Dependency overrides merged over the manifest's sections.
    pub dependencies: BTreeMap<String, String>,
}

/// Dependency installer bound to one registry.
pub struct NpmInstaller {
    http: reqwest::Client,
    registry_base_url: Url,
    local: LocalCache,
    db: Option<CacheDb>,
    /// Script map retained from the most recent successful install.
    scripts: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for NpmInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpmInstaller")
            .field("registry_base_url", &self.registry_base_url.as_str())
            .field("persistent_cache", &self.db.is_some())
            .finish_non_exhaustive()
    }
}

impl NpmInstaller {
    /// Create an installer for the given registry base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// created.
    pub fn new(registry_base_url: &str) -> Result<Self, NpmError> {
        let registry_base_url = Url::parse(registry_base_url).map_err(|e| {
            NpmError::registry(format!("Invalid registry URL '{registry_base_url}': {e}"))
        })?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(concat!("esbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NpmError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            registry_base_url,
            local: LocalCache::new(),
            db: None,
            scripts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Attach a persistent cache database.
    #[must_use]
    pub fn with_cache_db(mut self, db: CacheDb) -> Self {
        self.db = Some(db);
        self
    }

    /// Absolute entry path for an executable recorded by the last install.
    #[must_use]
    pub fn dependency_scripts(&self, cmd: &str) -> Option<String> {
        self.scripts
            .lock()
            .ok()
            .and_then(|scripts| scripts.get(cmd).cloned())
    }

    pub(crate) fn request_url(&self, request: &str) -> Result<Url, NpmError> {
        self.registry_base_url
            .join(request)
            .map_err(|e| NpmError::registry(format!("Failed to build URL for '{request}': {e}")))
    }

    pub(crate) fn set_scripts(&self, map: BTreeMap<String, String>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            *scripts = map;
        }
    }
}

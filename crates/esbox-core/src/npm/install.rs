//! Package fetch and `/node_modules` population.

use super::scripts::{derive_package_scripts, SCRIPTS_PATH};
use super::{
    wire, InstallOptions, NpmError, NpmInstaller, FETCH_ATTEMPTS, FETCH_TIMEOUT_SECS,
    MAX_CONCURRENT_FETCHES, RETRY_BACKOFF_MS,
};
use crate::progress::ProgressSink;
use crate::vfs::SharedFs;
use bytes::Bytes;
use esbox_util::vpath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;
use url::Url;

impl NpmInstaller {
    /// Resolve and install the project's dependency set into `/node_modules`.
    ///
    /// Package fetches run concurrently under a global bound of
    /// [`MAX_CONCURRENT_FETCHES`] with a per-package timeout; one failure
    /// (after retries) rejects the whole install. Files already written by
    /// earlier packages are not rolled back; a later install skips them via
    /// the per-package version check.
    ///
    /// Returns the resolved dependency set, empty when the fingerprint was
    /// unchanged and nothing was installed.
    pub async fn install(
        &self,
        fs: &SharedFs,
        opts: &InstallOptions,
        progress: &ProgressSink,
    ) -> Result<BTreeMap<String, String>, NpmError> {
        progress.info("resolving dependency set");
        let outcome = self.resolve_dependencies(fs, opts, progress).await?;
        let Some(resolved) = outcome.dependencies else {
            progress.info("dependencies unchanged, nothing to install");
            return Ok(BTreeMap::new());
        };

        progress.info(format!("installing {} packages", resolved.len()));

        let scripts = Mutex::new(BTreeMap::new());
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));

        let jobs = resolved.iter().map(|(name, version)| {
            let semaphore = Arc::clone(&semaphore);
            let scripts = &scripts;
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| NpmError::internal("fetch queue closed"))?;
                tokio::time::timeout(
                    Duration::from_secs(FETCH_TIMEOUT_SECS),
                    self.install_one(fs, name, version, scripts, progress),
                )
                .await
                .map_err(|_| NpmError::timeout(name, version))?
            }
        });
        futures::future::try_join_all(jobs).await?;

        let scripts = scripts.into_inner();
        {
            let json = serde_json::to_string(&scripts)?;
            let mut fs = fs.lock().await;
            fs.write_file(SCRIPTS_PATH, &json);
        }
        self.set_scripts(scripts);

        progress.info(format!("installed {} packages", resolved.len()));
        Ok(resolved)
    }

    async fn install_one(
        &self,
        fs: &SharedFs,
        name: &str,
        version: &str,
        scripts: &Mutex<BTreeMap<String, String>>,
        progress: &ProgressSink,
    ) -> Result<(), NpmError> {
        let manifest_path = format!("/node_modules/{name}/package.json");

        {
            let fs = fs.lock().await;
            let manifest = fs.read_file(&manifest_path);
            if installed_version(&manifest).as_deref() == Some(version) {
                progress.info(format!("{name}@{version} already installed, skipping"));
                return Ok(());
            }
        }

        let request = wire::module_request(name, version);
        let hit = self.db.as_ref().is_some_and(|db| db.is_cached(&request));
        progress.info(format!(
            "{} for {name}@{version}",
            if hit { "cache hit" } else { "cache miss" }
        ));

        let files = match &self.db {
            Some(db) => {
                db.with_data(
                    &request,
                    || self.fetch_module(&request, progress),
                    wire::decode_module_files,
                )
                .await?
            }
            None => wire::decode_module_files(&self.fetch_module(&request, progress).await?)?,
        };

        {
            let base = format!("/node_modules/{name}");
            let mut fs = fs.lock().await;
            for (rel, bytes) in &files {
                let path = vpath::join_under(&base, rel);
                fs.write_file(&path, &String::from_utf8_lossy(bytes));
            }
        }

        let manifest_text = { fs.lock().await.read_file(&manifest_path) };
        if let Ok(manifest) = serde_json::from_str::<Value>(&manifest_text) {
            let derived = derive_package_scripts(name, &manifest);
            if !derived.is_empty() {
                scripts.lock().await.extend(derived);
            }
        }

        Ok(())
    }

    /// Fetch one module payload with fixed-back-off retries.
    async fn fetch_module(&self, request: &str, progress: &ProgressSink) -> Result<Bytes, NpmError> {
        let url = self.request_url(request)?;
        let mut last_err = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.try_fetch(&url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(url = %url, attempt, error = %e, "module fetch failed");
                    last_err = Some(e);
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| NpmError::fetch_failed("exhausted retries"));
        progress.error(format!("failed to fetch {request}: {err}"));
        Err(err)
    }

    async fn try_fetch(&self, url: &Url) -> Result<Bytes, NpmError> {
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(NpmError::fetch_failed(format!(
                "status {} for '{url}'",
                response.status()
            )));
        }
        Ok(response.bytes().await?)
    }
}

fn installed_version(manifest: &str) -> Option<String> {
    serde_json::from_str::<Value>(manifest)
        .ok()?
        .get("version")?
        .as_str()
        .map(str::to_string)
}

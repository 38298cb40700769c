//! Public facade: one shared FS plus the operations served by the pool.

use crate::artifact::{self, DEFAULT_ENGINE_VERSION};
use crate::error::PoolError;
use crate::pool::{Pool, PoolConfig, DEFAULT_QUEUE_TIMEOUT};
use crate::wasm::WasmEngineFactory;
use bytes::Bytes;
use esbox_core::engine::EngineFactory;
use esbox_core::npm;
use esbox_core::progress::ProgressSink;
use esbox_core::vfs::{MemFs, SharedFs};
use esbox_proto::{BuildOptions, RawFiles, TransformOptions, WorkerOutput, WorkerRequest};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Initialisation parameters.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub engine_version: String,
    pub min_concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub queue_timeout: Option<Duration>,
    /// Root for the installer's persistent cache; platform default when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            engine_version: DEFAULT_ENGINE_VERSION.to_string(),
            min_concurrency: None,
            max_concurrency: None,
            queue_timeout: None,
            cache_dir: None,
        }
    }
}

/// One install invocation.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub registry_base_url: String,
    /// Working directory for the `package.json` lookup (default `/app`).
    pub cwd: Option<String>,
    /// Snapshot to install against; the shared FS when unset.
    pub raw_files: Option<RawFiles>,
    /// Overrides merged over the manifest's dependency sections.
    pub dependencies: BTreeMap<String, String>,
}

enum ArtifactSource {
    /// Fetch from the public CDNs on every (re)load.
    Cdn,
    /// A caller-provided artifact, reused across reloads.
    Fixed(Bytes),
}

impl ArtifactSource {
    async fn fetch(&self, version: &str) -> Result<Bytes, PoolError> {
        match self {
            Self::Cdn => artifact::fetch_engine_wasm(version).await,
            Self::Fixed(bytes) => {
                artifact::check_engine_version(version)?;
                Ok(bytes.clone())
            }
        }
    }
}

/// Handle over the shared FS and the worker pool.
pub struct Esbox {
    fs: SharedFs,
    pool: Pool,
    source: ArtifactSource,
    version: Mutex<String>,
}

impl std::fmt::Debug for Esbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Esbox").finish_non_exhaustive()
    }
}

/// Boot the default engine host: fetch the engine artifact from the CDNs and
/// warm a pool of WASM workers.
pub async fn init(options: InitOptions) -> Result<Esbox, PoolError> {
    Esbox::build(options, Arc::new(WasmEngineFactory), ArtifactSource::Cdn).await
}

impl Esbox {
    /// Boot against a caller-supplied engine factory and artifact.
    ///
    /// Used for embedding a pre-fetched engine and by tests that substitute
    /// the engine entirely.
    pub async fn init_with_engine(
        options: InitOptions,
        factory: Arc<dyn EngineFactory>,
        wasm: Bytes,
    ) -> Result<Self, PoolError> {
        Self::build(options, factory, ArtifactSource::Fixed(wasm)).await
    }

    async fn build(
        options: InitOptions,
        factory: Arc<dyn EngineFactory>,
        source: ArtifactSource,
    ) -> Result<Self, PoolError> {
        let version = options.engine_version.clone();
        let wasm = source.fetch(&version).await?;

        let config = PoolConfig {
            min_concurrency: options.min_concurrency,
            max_concurrency: options.max_concurrency,
            queue_timeout: options.queue_timeout.unwrap_or(DEFAULT_QUEUE_TIMEOUT),
            cache_dir: options.cache_dir,
        };

        let fs = MemFs::new().into_shared();
        let pool = Pool::new(factory, config, fs.clone(), &version, wasm).await?;

        Ok(Self {
            fs,
            pool,
            source,
            version: Mutex::new(version),
        })
    }

    /// The shared FS backing `bundle` and `npm_install` snapshots.
    #[must_use]
    pub fn fs(&self) -> SharedFs {
        Arc::clone(&self.fs)
    }

    /// Current worker count.
    pub async fn pool_size(&self) -> usize {
        self.pool.size().await
    }

    /// Compile a single source text.
    pub async fn transform(
        &self,
        input: impl Into<String>,
        options: TransformOptions,
    ) -> Result<WorkerOutput, PoolError> {
        self.pool
            .submit(
                WorkerRequest::Transform {
                    input: input.into(),
                    options,
                },
                None,
            )
            .await
    }

    /// Bundle a project snapshot (the shared FS when `raw_files` is unset).
    pub async fn bundle(
        &self,
        options: BuildOptions,
        raw_files: Option<RawFiles>,
    ) -> Result<WorkerOutput, PoolError> {
        let files = match raw_files {
            Some(files) => files,
            None => self.fs.lock().await.raw_files(),
        };
        self.pool
            .submit(WorkerRequest::Build { files, options }, None)
            .await
    }

    /// Install dependencies, streaming progress to `progress`.
    pub async fn npm_install(
        &self,
        request: InstallRequest,
        progress: Option<ProgressSink>,
    ) -> Result<WorkerOutput, PoolError> {
        let files = match request.raw_files {
            Some(files) => files,
            None => self.fs.lock().await.raw_files(),
        };
        self.pool
            .submit(
                WorkerRequest::NpmInstall {
                    files,
                    registry_base_url: request.registry_base_url,
                    cwd: request.cwd,
                    dependencies: request.dependencies,
                },
                progress,
            )
            .await
    }

    /// Swap the engine version at runtime; pending tasks are rejected with
    /// the reload reason.
    pub async fn reload(&self, engine_version: Option<&str>) -> Result<(), PoolError> {
        let mut version = self.version.lock().await;
        if let Some(v) = engine_version {
            *version = v.to_string();
        }
        let wasm = self.source.fetch(&version).await?;
        self.pool.reload(&version, wasm).await
    }

    /// Entry path for an executable recorded by the most recent install.
    pub async fn dependency_scripts(&self, cmd: &str) -> Option<String> {
        let fs = self.fs.lock().await;
        let map: BTreeMap<String, String> =
            serde_json::from_str(&fs.read_file(npm::SCRIPTS_PATH)).ok()?;
        map.get(cmd).cloned()
    }

    /// Look up a `package.json` script on the shared FS.
    pub async fn package_script(&self, name: &str) -> Option<(String, Vec<String>)> {
        let fs = self.fs.lock().await;
        npm::package_script(&fs, name)
    }
}

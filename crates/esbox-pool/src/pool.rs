//! Worker pool: sizing, dispatch, correlation routing, reload.
//!
//! All shared mutable state (the waiting table, the idle list, the admission
//! semaphore) lives inside one generation object owned by this module.
//! Submissions hold an `Arc` to the generation they were admitted to, so a
//! reload can atomically swap in a fresh generation while stragglers from
//! the prior one are rejected with the reload reason.

use crate::error::PoolError;
use crate::worker::{run_worker, WorkerContext};
use bytes::Bytes;
use esbox_core::engine::EngineFactory;
use esbox_core::progress::ProgressSink;
use esbox_core::vfs::SharedFs;
use esbox_proto::{
    codes, ErrorInfo, ReplyFrame, RequestFrame, TaskStatus, WorkerOutput, WorkerRequest,
    RELOAD_ABORT_REASON,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

/// Default limit on how long a submission may wait for a worker slot.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub queue_timeout: Duration,
    /// Root for the installer's persistent cache; platform default when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_concurrency: None,
            max_concurrency: None,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            cache_dir: None,
        }
    }
}

/// Clamp the machine's advertised hardware concurrency into the configured
/// band (defaults `[2, 5]`, hardware default 2 when unknown).
#[must_use]
pub fn pool_size(config: &PoolConfig) -> usize {
    let hw = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2);
    let min = config.min_concurrency.unwrap_or(2).max(1);
    let max = config.max_concurrency.unwrap_or(5).max(min);
    hw.clamp(min, max)
}

struct Pending {
    reply: oneshot::Sender<Result<WorkerOutput, ErrorInfo>>,
    progress: Option<ProgressSink>,
    worker: usize,
    /// Held for the task's lifetime; dropping it frees the queue slot.
    _permit: OwnedSemaphorePermit,
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<RequestFrame>,
    join: tokio::task::JoinHandle<()>,
}

/// One engine generation: workers, routing state, admission queue.
struct Generation {
    workers: Vec<WorkerHandle>,
    idle: Arc<Mutex<Vec<usize>>>,
    waiting: Arc<Mutex<HashMap<Uuid, Pending>>>,
    slots: Arc<Semaphore>,
    router: tokio::task::JoinHandle<()>,
    queue_timeout: Duration,
}

/// The worker pool.
pub struct Pool {
    generation: RwLock<Arc<Generation>>,
    factory: Arc<dyn EngineFactory>,
    config: PoolConfig,
    shared_fs: SharedFs,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Pool {
    /// Boot a pool of engine workers from a fetched artifact.
    pub async fn new(
        factory: Arc<dyn EngineFactory>,
        config: PoolConfig,
        shared_fs: SharedFs,
        version: &str,
        wasm: Bytes,
    ) -> Result<Self, PoolError> {
        let generation = spawn_generation(&factory, &config, &shared_fs, version, &wasm).await?;
        Ok(Self {
            generation: RwLock::new(Arc::new(generation)),
            factory,
            config,
            shared_fs,
        })
    }

    /// Current worker count.
    pub async fn size(&self) -> usize {
        self.generation.read().await.workers.len()
    }

    /// Submit a request and await its terminal status.
    ///
    /// Admission is queue-arrival order up to pool width; the slot frees when
    /// the terminal status routes. Progress frames stream to `progress`.
    pub async fn submit(
        &self,
        request: WorkerRequest,
        progress: Option<ProgressSink>,
    ) -> Result<WorkerOutput, PoolError> {
        let generation = Arc::clone(&*self.generation.read().await);

        let permit = match tokio::time::timeout(
            generation.queue_timeout,
            Arc::clone(&generation.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore closes when this generation is torn down.
            Ok(Err(_)) => {
                return Err(PoolError::from_info(ErrorInfo::new(
                    codes::POOL_RELOAD,
                    RELOAD_ABORT_REASON,
                )))
            }
            Err(_) => return Err(PoolError::QueueTimeout(generation.queue_timeout)),
        };

        let Some(worker) = lock(&generation.idle).pop() else {
            return Err(PoolError::Internal(
                "queue slot granted with no idle worker".to_string(),
            ));
        };

        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&generation.waiting).insert(
            id,
            Pending {
                reply: reply_tx,
                progress,
                worker,
                _permit: permit,
            },
        );
        debug!(id = %id, worker, "dispatching task");

        if generation.workers[worker]
            .tx
            .send(RequestFrame { id, request })
            .is_err()
        {
            lock(&generation.waiting).remove(&id);
            return Err(PoolError::WorkerLost(format!("worker {worker} is gone")));
        }

        match reply_rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(info)) => Err(PoolError::from_info(info)),
            Err(_) => Err(PoolError::WorkerLost(
                "task dropped without a terminal status".to_string(),
            )),
        }
    }

    /// Swap the engine at runtime.
    ///
    /// Every pending task is rejected with the reload reason, the prior
    /// workers are terminated unconditionally, and the replacement pool is
    /// fully built before new submissions are admitted.
    pub async fn reload(&self, version: &str, wasm: Bytes) -> Result<(), PoolError> {
        let mut guard = self.generation.write().await;

        let old = Arc::clone(&*guard);
        for (_, pending) in lock(&old.waiting).drain() {
            let _ = pending
                .reply
                .send(Err(ErrorInfo::new(codes::POOL_RELOAD, RELOAD_ABORT_REASON)));
        }
        old.slots.close();
        for handle in &old.workers {
            handle.join.abort();
        }
        old.router.abort();

        let fresh =
            spawn_generation(&self.factory, &self.config, &self.shared_fs, version, &wasm).await?;
        *guard = Arc::new(fresh);
        info!(version, "pool reloaded");
        Ok(())
    }
}

async fn spawn_generation(
    factory: &Arc<dyn EngineFactory>,
    config: &PoolConfig,
    shared_fs: &SharedFs,
    version: &str,
    wasm: &Bytes,
) -> Result<Generation, PoolError> {
    let size = pool_size(config);
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(usize, ReplyFrame)>();
    let idle = Arc::new(Mutex::new(Vec::with_capacity(size)));
    let waiting: Arc<Mutex<HashMap<Uuid, Pending>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut workers = Vec::with_capacity(size);
    let mut setups = Vec::with_capacity(size);

    for index in 0..size {
        let (tx, rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = oneshot::channel();
        let ctx = WorkerContext {
            index,
            shared_fs: shared_fs.clone(),
            cache_dir: config.cache_dir.clone(),
            reply_tx: reply_tx.clone(),
        };
        let factory = Arc::clone(factory);
        let version = version.to_string();
        let wasm = wasm.clone();

        let join = tokio::spawn(async move {
            // Setup handshake: instantiate the engine, report exactly once.
            let engine = match factory.create(&version, &wasm) {
                Ok(engine) => {
                    let _ = setup_tx.send(Ok(()));
                    engine
                }
                Err(e) => {
                    let _ = setup_tx.send(Err(e.to_string()));
                    return;
                }
            };
            run_worker(ctx, engine, rx).await;
        });

        workers.push(WorkerHandle { tx, join });
        setups.push(setup_rx);
    }
    drop(reply_tx);

    // Only workers that acknowledged setup enter the pool; any failure is
    // fatal for the whole generation.
    for (index, setup) in setups.into_iter().enumerate() {
        let outcome = setup.await;
        match outcome {
            Ok(Ok(())) => lock(&idle).push(index),
            Ok(Err(reason)) => {
                abort_all(&workers);
                return Err(PoolError::Bootstrap(format!(
                    "worker {index} setup failed: {reason}"
                )));
            }
            Err(_) => {
                abort_all(&workers);
                return Err(PoolError::Bootstrap(format!(
                    "worker {index} died during setup"
                )));
            }
        }
    }

    let router_idle = Arc::clone(&idle);
    let router_waiting = Arc::clone(&waiting);
    let router = tokio::spawn(async move {
        while let Some((worker, frame)) = reply_rx.recv().await {
            route_frame(&router_idle, &router_waiting, worker, frame);
        }
    });

    Ok(Generation {
        workers,
        idle,
        waiting,
        slots: Arc::new(Semaphore::new(size)),
        router,
        queue_timeout: config.queue_timeout,
    })
}

fn abort_all(workers: &[WorkerHandle]) {
    for handle in workers {
        handle.join.abort();
    }
}

/// Route one reply frame by correlation id.
///
/// Terminal statuses free the slot and return the worker to the idle list;
/// progress does neither. Frames whose id is no longer registered (timeout,
/// reload) are dropped silently.
fn route_frame(
    idle: &Mutex<Vec<usize>>,
    waiting: &Mutex<HashMap<Uuid, Pending>>,
    worker: usize,
    frame: ReplyFrame,
) {
    match frame.status {
        TaskStatus::Progress(msg) => {
            let sink = lock(waiting)
                .get(&frame.id)
                .and_then(|pending| pending.progress.clone());
            match sink {
                Some(sink) => sink.emit(msg),
                None => debug!(id = %frame.id, "dropping progress for unknown task"),
            }
        }
        TaskStatus::Resolve(output) => route_terminal(idle, waiting, worker, frame.id, Ok(output)),
        TaskStatus::Reject(info) => route_terminal(idle, waiting, worker, frame.id, Err(info)),
    }
}

fn route_terminal(
    idle: &Mutex<Vec<usize>>,
    waiting: &Mutex<HashMap<Uuid, Pending>>,
    worker: usize,
    id: Uuid,
    result: Result<WorkerOutput, ErrorInfo>,
) {
    let Some(pending) = lock(waiting).remove(&id) else {
        debug!(id = %id, "dropping late reply");
        return;
    };
    lock(idle).push(worker);
    let _ = pending.reply.send(result);
    // `pending` drops here, releasing the queue slot.
}

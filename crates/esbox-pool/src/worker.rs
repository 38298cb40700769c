//! In-worker request handling.
//!
//! Each worker task owns one engine instance and a private scratch FS. A
//! transform resets the FS to empty; a build reseeds it from the provided
//! snapshot; an install runs on a fresh FS whose mutations are mirrored back
//! into the shared FS while progress frames stream to the dispatcher.

use esbox_core::cache::CacheDb;
use esbox_core::engine::fmt::{self, Severity};
use esbox_core::engine::{Engine, EngineError};
use esbox_core::npm::{InstallOptions, NpmInstaller};
use esbox_core::progress::ProgressSink;
use esbox_core::vfs::{apply_op, ChannelMirror, MemFs, SharedFs};
use esbox_core::NpmError;
use esbox_proto::{
    codes, BuildOptions, BuildOutput, ErrorInfo, InstallOutput, OutputFile, RawFiles, ReplyFrame,
    RequestFrame, TaskStatus, TransformOptions, TransformOutput, WorkerOutput, WorkerRequest,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Output directory pinned for every build; stripped from returned paths.
pub const OUTDIR: &str = "/dist/";

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

pub(crate) struct WorkerContext {
    pub index: usize,
    pub shared_fs: SharedFs,
    pub cache_dir: Option<PathBuf>,
    pub reply_tx: mpsc::UnboundedSender<(usize, ReplyFrame)>,
}

pub(crate) async fn run_worker(
    ctx: WorkerContext,
    mut engine: Box<dyn Engine>,
    mut rx: mpsc::UnboundedReceiver<RequestFrame>,
) {
    let mut fs = MemFs::new();

    while let Some(frame) = rx.recv().await {
        let id = frame.id;
        let status = handle_request(&ctx, id, engine.as_mut(), &mut fs, frame.request).await;
        if ctx
            .reply_tx
            .send((ctx.index, ReplyFrame { id, status }))
            .is_err()
        {
            // Dispatcher is gone; nothing left to serve.
            break;
        }
    }
}

async fn handle_request(
    ctx: &WorkerContext,
    id: Uuid,
    engine: &mut dyn Engine,
    fs: &mut MemFs,
    request: WorkerRequest,
) -> TaskStatus {
    match request {
        WorkerRequest::Transform { input, options } => {
            *fs = MemFs::new();
            transform(engine, &input, &options)
        }
        WorkerRequest::Build { files, options } => {
            *fs = MemFs::from_raw_files(&files);
            build(engine, fs, options)
        }
        WorkerRequest::NpmInstall {
            files,
            registry_base_url,
            cwd,
            dependencies,
        } => npm_install(ctx, id, &files, &registry_base_url, cwd, dependencies).await,
    }
}

fn transform(engine: &mut dyn Engine, input: &str, options: &TransformOptions) -> TaskStatus {
    let started = Instant::now();
    match engine.transform(input, options) {
        Ok(raw) => {
            let formatted = fmt::format_diagnostics(Severity::Warning, &raw.warnings);
            let stderr = fmt::merge_stderr(&formatted, &raw.stderr);
            TaskStatus::Resolve(WorkerOutput::Transform(TransformOutput {
                code: raw.code,
                map: raw.map,
                mangle_cache: raw.mangle_cache,
                legal_comments: raw.legal_comments,
                stderr,
                duration_ms: elapsed_ms(started),
            }))
        }
        Err(e) => engine_failure(e),
    }
}

fn build(engine: &mut dyn Engine, fs: &MemFs, mut options: BuildOptions) -> TaskStatus {
    let started = Instant::now();
    options.outdir = Some(OUTDIR.to_string());

    match engine.build(&fs.raw_files(), &options) {
        Ok(raw) => {
            let formatted = fmt::format_diagnostics(Severity::Warning, &raw.warnings);
            let stderr = fmt::merge_stderr(&formatted, &raw.stderr);
            let output_files = raw
                .output_files
                .into_iter()
                .map(|file| OutputFile {
                    path: strip_outdir(&file.path),
                    text: file.text,
                })
                .collect();
            TaskStatus::Resolve(WorkerOutput::Build(BuildOutput {
                output_files,
                metafile: raw.metafile,
                mangle_cache: raw.mangle_cache,
                duration_ms: elapsed_ms(started),
                stderr,
            }))
        }
        Err(e) => engine_failure(e),
    }
}

async fn npm_install(
    ctx: &WorkerContext,
    id: Uuid,
    files: &RawFiles,
    registry_base_url: &str,
    cwd: Option<String>,
    dependencies: BTreeMap<String, String>,
) -> TaskStatus {
    let started = Instant::now();

    let installer = match build_installer(ctx, registry_base_url) {
        Ok(installer) => installer,
        Err(e) => {
            return TaskStatus::Reject(ErrorInfo::new(codes::NPM_INSTALL_FAILED, e.to_string()))
        }
    };

    // Fresh in-worker FS seeded from the snapshot; every mutation is
    // mirrored into the shared FS while the install runs.
    let (mirror, mut ops) = ChannelMirror::new();
    let shared = ctx.shared_fs.clone();
    let applier = tokio::spawn(async move {
        while let Some(op) = ops.recv().await {
            let mut fs = shared.lock().await;
            apply_op(&mut fs, op);
        }
    });

    let mut worker_fs = MemFs::from_raw_files(files);
    worker_fs.bind_mirror(Arc::new(mirror));
    let worker_fs = worker_fs.into_shared();

    let reply_tx = ctx.reply_tx.clone();
    let index = ctx.index;
    let progress = ProgressSink::new(move |msg| {
        let _ = reply_tx.send((
            index,
            ReplyFrame {
                id,
                status: TaskStatus::Progress(msg),
            },
        ));
    });

    let opts = InstallOptions { cwd, dependencies };
    let result = installer.install(&worker_fs, &opts, &progress).await;

    // Close the mirror and wait for the flush so the shared FS is complete
    // before the terminal status lands.
    drop(worker_fs);
    let _ = applier.await;

    match result {
        Ok(dependencies) => TaskStatus::Resolve(WorkerOutput::NpmInstall(InstallOutput {
            dependencies,
            duration_ms: elapsed_ms(started),
        })),
        Err(e) => TaskStatus::Reject(ErrorInfo::new(codes::NPM_INSTALL_FAILED, e.to_string())),
    }
}

fn build_installer(ctx: &WorkerContext, registry_base_url: &str) -> Result<NpmInstaller, NpmError> {
    let installer = NpmInstaller::new(registry_base_url)?;
    let db = match &ctx.cache_dir {
        Some(dir) => CacheDb::open(dir).ok(),
        None => CacheDb::open_default().ok(),
    };
    Ok(match db {
        Some(db) => installer.with_cache_db(db),
        None => installer,
    })
}

/// Engine diagnostics (and bare engine exceptions) resolve successfully with
/// a merged stderr and a JSON stdout; protocol rejects are reserved for
/// harness failures.
fn engine_failure(e: EngineError) -> TaskStatus {
    let (errors, warnings) = e.into_diagnostics();
    TaskStatus::Resolve(WorkerOutput::Diagnostics(fmt::diagnostics_output(
        &errors, &warnings, "",
    )))
}

fn strip_outdir(path: &str) -> String {
    path.strip_prefix(OUTDIR)
        .or_else(|| path.strip_prefix(OUTDIR.trim_start_matches('/')))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_outdir() {
        assert_eq!(strip_outdir("/dist/index.js"), "index.js");
        assert_eq!(strip_outdir("dist/chunk-1.js"), "chunk-1.js");
        assert_eq!(strip_outdir("other/file.js"), "other/file.js");
    }
}

use super::snapshot_dir;
use esbox_core::ProgressSink;
use esbox_pool::{init, InitOptions, InstallRequest};
use esbox_proto::{ProgressLevel, WorkerOutput};
use esbox_util::diskio::atomic_write;
use esbox_util::vpath;
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use tracing::{error, info};

pub async fn run(dir: &Path, registry: &str, engine_version: &str) -> Result<()> {
    let files = snapshot_dir(dir, "app")?;

    let esbox = init(InitOptions {
        engine_version: engine_version.to_string(),
        ..InitOptions::default()
    })
    .await
    .into_diagnostic()?;

    let progress = ProgressSink::new(|msg| match msg.level {
        ProgressLevel::Info => info!("{}", msg.message),
        ProgressLevel::Error => error!("{}", msg.message),
    });

    let output = esbox
        .npm_install(
            InstallRequest {
                registry_base_url: registry.to_string(),
                raw_files: Some(files),
                ..InstallRequest::default()
            },
            Some(progress),
        )
        .await
        .into_diagnostic()?;

    let result = match output {
        WorkerOutput::NpmInstall(result) => result,
        other => return Err(miette!("unexpected worker output: {other:?}")),
    };

    // The worker mirrored the install into the shared FS; materialise the
    // node_modules tree next to the project.
    let fs = esbox.fs();
    let fs = fs.lock().await;
    let mut written = 0usize;
    for key in fs.read_dir("/node_modules") {
        let target = dir.join(vpath::normalize(&key));
        atomic_write(&target, fs.read_file(&key).as_bytes()).into_diagnostic()?;
        written += 1;
    }

    info!(
        packages = result.dependencies.len(),
        files = written,
        "install complete"
    );
    Ok(())
}

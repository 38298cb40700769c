use super::snapshot_dir;
use esbox_pool::{init, InitOptions};
use esbox_proto::{BuildOptions, WorkerOutput};
use esbox_util::diskio::atomic_write;
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use tracing::info;

pub async fn run(dir: &Path, entry: &str, outdir: &Path, engine_version: &str) -> Result<()> {
    let files = snapshot_dir(dir, "app")?;
    if files.is_empty() {
        return Err(miette!("no files found under {}", dir.display()));
    }

    let esbox = init(InitOptions {
        engine_version: engine_version.to_string(),
        ..InitOptions::default()
    })
    .await
    .into_diagnostic()?;

    let options = BuildOptions {
        entry_points: vec![format!("/app/{entry}")],
        ..BuildOptions::default()
    };
    let output = esbox.bundle(options, Some(files)).await.into_diagnostic()?;

    match output {
        WorkerOutput::Build(result) => {
            if !result.stderr.is_empty() {
                eprintln!("{}", result.stderr);
            }
            for file in &result.output_files {
                let target = outdir.join(&file.path);
                atomic_write(&target, file.text.as_bytes()).into_diagnostic()?;
            }
            info!(
                files = result.output_files.len(),
                duration_ms = result.duration_ms,
                "bundle written to {}",
                outdir.display()
            );
            Ok(())
        }
        WorkerOutput::Diagnostics(diag) => {
            eprintln!("{}", diag.stderr);
            Err(miette!("bundle failed: {}", diag.stdout))
        }
        other => Err(miette!("unexpected worker output: {other:?}")),
    }
}
